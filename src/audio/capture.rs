use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::chunk::AudioChunk;

/// Configuration for an audio capture source
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate the realtime service expects
    pub sample_rate: u32,
    /// Chunk length in milliseconds (affects latency)
    pub chunk_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_duration_ms: 100,
        }
    }
}

/// Source of PCM16 mono chunks for the live session.
///
/// Platform capture (microphone, system audio) lives outside this crate;
/// it only has to hand over chunks through the returned channel.
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Start capturing. Chunks arrive on the returned receiver until `stop`.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>>;

    /// Stop capturing
    async fn stop(&mut self) -> Result<()>;

    fn is_capturing(&self) -> bool;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Replays an in-memory PCM16 buffer as if it were being captured live.
pub struct BufferCapture {
    config: CaptureConfig,
    samples: Arc<Vec<i16>>,
    /// Sleep one chunk duration between chunks
    paced: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl BufferCapture {
    pub fn new(samples: Vec<i16>, config: CaptureConfig) -> Self {
        Self {
            config,
            samples: Arc::new(samples),
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Emit all chunks as fast as the consumer accepts them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn samples_per_chunk(&self) -> usize {
        ((self.config.sample_rate as u64 * self.config.chunk_duration_ms) / 1000).max(1) as usize
    }
}

#[async_trait::async_trait]
impl AudioCapture for BufferCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>> {
        let (tx, rx) = mpsc::channel(32);
        let samples = Arc::clone(&self.samples);
        let capturing = Arc::clone(&self.capturing);
        let per_chunk = self.samples_per_chunk();
        let sample_rate = self.config.sample_rate;
        let chunk_ms = self.config.chunk_duration_ms;
        let paced = self.paced;

        capturing.store(true, Ordering::SeqCst);
        info!("Buffer capture started: {} samples, {} per chunk", samples.len(), per_chunk);

        self.task = Some(tokio::spawn(async move {
            for (index, block) in samples.chunks(per_chunk).enumerate() {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = AudioChunk::from_samples(block.to_vec(), sample_rate, index as u64 * chunk_ms);
                if tx.send(chunk).await.is_err() {
                    break;
                }
                if paced {
                    tokio::time::sleep(Duration::from_millis(chunk_ms)).await;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Buffer capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "buffer"
    }
}
