//! Outbound notifications to the embedding application.
//!
//! Callbacks are queued onto a single delivery task so they arrive in the
//! order the engine produced them and never run while engine locks are held.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::analysis::AudioType;
use crate::connection::ConnectionStatus;

/// Receives engine notifications. Every method defaults to a no-op.
pub trait EngineListener: Send + Sync + 'static {
    fn on_connection_status_changed(&self, _status: ConnectionStatus) {}

    fn on_transcription_update(&self, _text: &str) {}

    fn on_summary_generated(&self, _summary: &str, _audio_type: AudioType) {}

    fn on_audio_type_detected(&self, _audio_type: AudioType) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EngineListener for NoopListener {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ConnectionStatus(ConnectionStatus),
    Transcription(String),
    Summary {
        summary: String,
        audio_type: AudioType,
    },
    AudioType(AudioType),
}

impl Notification {
    fn deliver(self, listener: &dyn EngineListener) {
        match self {
            Notification::ConnectionStatus(status) => listener.on_connection_status_changed(status),
            Notification::Transcription(text) => listener.on_transcription_update(&text),
            Notification::Summary {
                summary,
                audio_type,
            } => listener.on_summary_generated(&summary, audio_type),
            Notification::AudioType(audio_type) => listener.on_audio_type_detected(audio_type),
        }
    }
}

/// Cheap handle for queueing notifications
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(listener: Arc<dyn EngineListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                notification.deliver(listener.as_ref());
            }
            debug!("Notification channel closed");
        });
        Self { tx: Some(tx) }
    }

    /// Drops every notification
    pub fn headless() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            if tx.send(notification).is_err() {
                debug!("Listener gone, dropping notification");
            }
        }
    }

    pub fn connection_status(&self, status: ConnectionStatus) {
        self.notify(Notification::ConnectionStatus(status));
    }

    pub fn transcription(&self, text: &str) {
        self.notify(Notification::Transcription(text.to_string()));
    }

    /// Summary followed by the detected audio type
    pub fn summary(&self, summary: &str, audio_type: AudioType) {
        self.notify(Notification::Summary {
            summary: summary.to_string(),
            audio_type,
        });
        self.notify(Notification::AudioType(audio_type));
    }
}
