// Shared test doubles: a scripted in-memory transport and a listener that
// records every notification.

#![allow(dead_code)]

use async_trait::async_trait;
use memo_realtime::connection::{
    Connector, HandshakeVariant, InboundFrame, OutboundFrame, Transport, TransportSink,
    TransportStream,
};
use memo_realtime::{AudioType, ConnectionStatus, EngineListener, TransportError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the connector does for one `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accept,
    Refuse,
    /// Never completes; the connection timeout has to fire
    Hang,
}

/// Server side of one accepted transport
pub struct ServerEnd {
    pub variant: HandshakeVariant,
    /// Frames the client wrote
    pub frames: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Frames to deliver to the client; drop to end the stream
    pub inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    /// Make every further client write fail
    pub break_sink: Arc<AtomicBool>,
}

impl ServerEnd {
    pub fn push_event(&self, event: Value) {
        let _ = self.inbound.send(Ok(InboundFrame::Text(event.to_string())));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(Ok(InboundFrame::Close(Some(code))));
    }

    /// Next text frame the client wrote, parsed as JSON
    pub async fn next_event(&mut self) -> Option<Value> {
        loop {
            match self.frames.recv().await? {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).ok(),
                _ => continue,
            }
        }
    }

    /// Wait for the next client event of `kind`, skipping others
    pub async fn expect_event(&mut self, kind: &str) -> Value {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(60), self.next_event())
                .await
                .expect("timed out waiting for client event")
                .expect("client transport closed");
            if event["type"] == kind {
                return event;
            }
        }
    }

    /// Everything written so far, without waiting
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    broken: Arc<AtomicBool>,
    delay: Duration,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>,
}

#[async_trait]
impl TransportStream for MockStream {
    async fn next(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.rx.recv().await
    }
}

/// Connector that follows a per-call script and hands every accepted
/// transport's server end to the test
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    /// Used once the script runs out
    default_step: Step,
    connects: AtomicUsize,
    variants: Mutex<Vec<HandshakeVariant>>,
    write_delay: Mutex<Duration>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl ScriptedConnector {
    pub fn new(
        script: impl IntoIterator<Item = Step>,
        default_step: Step,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            default_step,
            connects: AtomicUsize::new(0),
            variants: Mutex::new(Vec::new()),
            write_delay: Mutex::new(Duration::ZERO),
            servers,
        });
        (connector, rx)
    }

    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::new([], Step::Accept)
    }

    /// Every write on transports opened from now on takes `delay`
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn variants(&self) -> Vec<HandshakeVariant> {
        self.variants.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, variant: HandshakeVariant) -> Result<Transport, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.variants.lock().unwrap().push(variant);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_step);

        match step {
            Step::Refuse => Err(TransportError::Unreachable("refused".to_string())),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Step::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let broken = Arc::new(AtomicBool::new(false));
                let delay = *self.write_delay.lock().unwrap();
                let _ = self.servers.send(ServerEnd {
                    variant,
                    frames: out_rx,
                    inbound: in_tx,
                    break_sink: Arc::clone(&broken),
                });
                Ok(Transport {
                    sink: Box::new(MockSink {
                        tx: out_tx,
                        broken,
                        delay,
                    }),
                    stream: Box::new(MockStream { rx: in_rx }),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heard {
    Status(ConnectionStatus),
    Transcription(String),
    Summary(String, AudioType),
    AudioType(AudioType),
}

/// Forwards every callback to a channel the test can await on
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Heard>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Heard>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EngineListener for RecordingListener {
    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        let _ = self.tx.send(Heard::Status(status));
    }

    fn on_transcription_update(&self, text: &str) {
        let _ = self.tx.send(Heard::Transcription(text.to_string()));
    }

    fn on_summary_generated(&self, summary: &str, audio_type: AudioType) {
        let _ = self.tx.send(Heard::Summary(summary.to_string(), audio_type));
    }

    fn on_audio_type_detected(&self, audio_type: AudioType) {
        let _ = self.tx.send(Heard::AudioType(audio_type));
    }
}

/// Let spawned tasks run until nothing is immediately runnable
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Everything heard so far, without waiting
pub fn drain_heard(rx: &mut mpsc::UnboundedReceiver<Heard>) -> Vec<Heard> {
    let mut heard = Vec::new();
    while let Ok(h) = rx.try_recv() {
        heard.push(h);
    }
    heard
}

pub fn summaries(heard: &[Heard]) -> Vec<(String, AudioType)> {
    heard
        .iter()
        .filter_map(|h| match h {
            Heard::Summary(s, t) => Some((s.clone(), *t)),
            _ => None,
        })
        .collect()
}

pub fn statuses(heard: &[Heard]) -> Vec<ConnectionStatus> {
    heard
        .iter()
        .filter_map(|h| match h {
            Heard::Status(s) => Some(*s),
            _ => None,
        })
        .collect()
}
