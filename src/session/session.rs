use super::config::SessionConfig;
use super::stats::{SessionStats, TranscriptSegment};
use crate::analysis::{AnalysisRequest, EventDispatcher};
use crate::audio::AudioCapture;
use crate::config::ConnectionConfig;
use crate::connection::{Connector, ConnectionStatus, EventHandler, RealtimeConnection};
use crate::observer::Notifier;
use crate::protocol::{ClientEvent, ServerEvent, SessionConfiguration};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Transcripts shorter than this are treated as ambient sound
const MIN_SPEECH_CHARS: usize = 3;

/// Follow-up request sent for every completed transcription
pub fn smart_analysis_prompt(transcript: &str) -> String {
    if transcript.trim().chars().count() < MIN_SPEECH_CHARS {
        "请识别刚才音频中的环境声音类型（音乐、自然声、机械声或噪音），按 emoji:summary 格式输出，summary限5字。".to_string()
    } else {
        format!(
            "请分析这段语音内容：「{}」。按 emoji:summary 格式输出，emoji只能1个，summary限5-8个字。",
            transcript.trim()
        )
    }
}

/// Forwards events to the dispatcher and hands transcripts to the session
struct LiveEventHandler {
    dispatcher: Arc<EventDispatcher>,
    transcripts: mpsc::UnboundedSender<String>,
}

impl EventHandler for LiveEventHandler {
    fn handle(&self, event: ServerEvent) {
        let transcript = match &event {
            ServerEvent::TranscriptionCompleted { text } => Some(text.clone()),
            _ => None,
        };
        self.dispatcher.handle(event);
        if let Some(text) = transcript {
            let _ = self.transcripts.send(text);
        }
    }
}

/// A live recording session that streams captured audio to the realtime
/// service and collects transcripts and summaries
pub struct LiveSession {
    /// Session configuration
    config: SessionConfig,

    /// Connection dedicated to live recording
    connection: RealtimeConnection,

    /// Reconciles replies for this session
    dispatcher: Arc<EventDispatcher>,

    /// When the current recording started
    started_at: Arc<Mutex<DateTime<Utc>>>,

    /// Whether recording is currently active
    is_recording: Arc<AtomicBool>,

    /// Number of chunks accepted by the transport
    chunks_sent: Arc<AtomicUsize>,

    /// Accumulated transcript segments
    transcript_segments: Arc<Mutex<Vec<TranscriptSegment>>>,

    /// Active capture source
    capture: Arc<Mutex<Option<Box<dyn AudioCapture>>>>,

    /// Handle for the audio streaming task
    audio_task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Handle for the transcript follow-up task
    transcript_task_handle: std::sync::Mutex<Option<JoinHandle<()>>>,

    /// Abandons an unanswered turn after `result_timeout`
    watchdog_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LiveSession {
    /// Create a live session. Must be called inside a tokio runtime.
    pub fn new(
        config: SessionConfig,
        connection_config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        notifier: Notifier,
    ) -> Self {
        info!("Creating live session: {}", config.session_id);

        let dispatcher = Arc::new(EventDispatcher::new(
            notifier.clone(),
            config.transcription_wait,
        ));
        let (transcripts_tx, mut transcripts_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(LiveEventHandler {
            dispatcher: Arc::clone(&dispatcher),
            transcripts: transcripts_tx,
        });
        let connection = RealtimeConnection::new(
            "live",
            connection_config,
            SessionConfiguration::live(&config.voice),
            connector,
            handler,
            notifier,
        );

        let transcript_segments = Arc::new(Mutex::new(Vec::new()));
        let segments = Arc::clone(&transcript_segments);
        let follow_up = connection.clone();
        let transcript_task = tokio::spawn(async move {
            while let Some(text) = transcripts_rx.recv().await {
                segments.lock().await.push(TranscriptSegment {
                    text: text.clone(),
                    timestamp: Utc::now(),
                });

                let prompt = smart_analysis_prompt(&text);
                if let Err(e) = follow_up.send(&ClientEvent::user_text(prompt)).await {
                    warn!("Failed to request smart analysis: {}", e);
                    continue;
                }
                if let Err(e) = follow_up.send(&ClientEvent::response_create()).await {
                    warn!("Failed to request response: {}", e);
                }
            }
        });

        Self {
            config,
            connection,
            dispatcher,
            started_at: Arc::new(Mutex::new(Utc::now())),
            is_recording: Arc::new(AtomicBool::new(false)),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
            transcript_segments,
            capture: Arc::new(Mutex::new(None)),
            audio_task_handle: Arc::new(Mutex::new(None)),
            transcript_task_handle: std::sync::Mutex::new(Some(transcript_task)),
            watchdog_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn connection(&self) -> &RealtimeConnection {
        &self.connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Running summary (deltas until the final reply replaces them)
    pub fn current_summary(&self) -> String {
        self.dispatcher.current_summary()
    }

    pub fn current_transcription(&self) -> String {
        self.dispatcher.current_transcription()
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    /// Start streaming chunks from `capture`
    pub async fn start(&self, mut capture: Box<dyn AudioCapture>) -> Result<()> {
        if self.is_recording.load(Ordering::SeqCst) {
            warn!("Recording already started");
            return Ok(());
        }
        if self.connection.status() != ConnectionStatus::Connected {
            bail!(
                "Live connection is not ready ({})",
                self.connection.status().label()
            );
        }

        info!(
            "Starting recording: {} (capture: {})",
            self.config.session_id,
            capture.name()
        );

        let mut audio_rx = capture
            .start()
            .await
            .context("Failed to start audio capture")?;

        self.dispatcher.clear_request();
        self.chunks_sent.store(0, Ordering::SeqCst);
        *self.started_at.lock().await = Utc::now();
        self.is_recording.store(true, Ordering::SeqCst);

        let connection = self.connection.clone();
        let is_recording = Arc::clone(&self.is_recording);
        let chunks_sent = Arc::clone(&self.chunks_sent);

        let audio_task = tokio::spawn(async move {
            info!("Audio streaming task started");

            while let Some(chunk) = audio_rx.recv().await {
                if !is_recording.load(Ordering::SeqCst) {
                    break;
                }
                match connection.send(&ClientEvent::audio_chunk(&chunk)).await {
                    Ok(()) => {
                        chunks_sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => warn!("Dropped chunk {}: {}", chunk.id, e),
                }
            }

            info!("Audio streaming task stopped");
        });

        *self.audio_task_handle.lock().await = Some(audio_task);
        *self.capture.lock().await = Some(capture);

        Ok(())
    }

    async fn stop_capture(&self) {
        self.is_recording.store(false, Ordering::SeqCst);

        if let Some(mut capture) = self.capture.lock().await.take() {
            if let Err(e) = capture.stop().await {
                error!("Failed to stop {} capture: {}", capture.name(), e);
            }
        }

        let task = self.audio_task_handle.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Audio task panicked: {}", e);
            }
        }
    }

    /// Stop recording and commit the buffered audio for a reply
    pub async fn stop(&self) -> Result<SessionStats> {
        if !self.is_recording.load(Ordering::SeqCst) {
            warn!("Recording not active");
            return Ok(self.get_stats().await);
        }

        info!("Stopping recording: {}", self.config.session_id);
        let stats = {
            let mut stats = self.get_stats().await;
            self.stop_capture().await;
            stats.is_recording = false;
            stats.chunks_sent = self.chunks_sent.load(Ordering::SeqCst);
            stats
        };

        self.connection
            .send(&ClientEvent::audio_commit())
            .await
            .context("Failed to commit recorded audio")?;

        if let Some(previous) = self.dispatcher.active_request() {
            if previous.time_out() {
                warn!("Abandoning unanswered request {}", previous.id());
            }
        }
        let (request, _result_rx) = AnalysisRequest::new();
        self.dispatcher.begin_request(Arc::clone(&request));

        let result_timeout = self.config.result_timeout;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(result_timeout).await;
            if request.time_out() {
                warn!(
                    "Request {} got no reply within {:?}",
                    request.id(),
                    result_timeout
                );
            }
        });
        if let Some(old) = self.watchdog_handle.lock().await.replace(watchdog) {
            old.abort();
        }

        info!("Recording stopped: {} chunks sent", stats.chunks_sent);
        Ok(stats)
    }

    /// Stop capture without committing and close the connection
    pub async fn disconnect(&self) {
        if self.is_recording.load(Ordering::SeqCst) {
            self.stop_capture().await;
        }
        if let Some(watchdog) = self.watchdog_handle.lock().await.take() {
            watchdog.abort();
        }
        if let Some(request) = self.dispatcher.active_request() {
            request.cancel();
        }
        self.connection.disconnect().await;
    }

    /// Get current session statistics
    pub async fn get_stats(&self) -> SessionStats {
        let started_at = *self.started_at.lock().await;
        let duration = Utc::now().signed_duration_since(started_at);

        let transcript_count = {
            let segments = self.transcript_segments.lock().await;
            segments.len()
        };

        SessionStats {
            is_recording: self.is_recording.load(Ordering::SeqCst),
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            transcript_segments_count: transcript_count,
            connection_status: self.connection.status(),
        }
    }

    /// Get accumulated transcript
    pub async fn get_transcript(&self) -> Vec<TranscriptSegment> {
        let segments = self.transcript_segments.lock().await;
        segments.clone()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        let task = self
            .transcript_task_handle
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}
