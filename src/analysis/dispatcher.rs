use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::parser::{parse_response, strip_end_markers};
use super::request::{AnalysisRequest, AnalysisResult, Completion, ResponseOutcome};
use crate::connection::EventHandler;
use crate::observer::Notifier;
use crate::protocol::ServerEvent;

#[derive(Default)]
struct DispatchState {
    session_ready: bool,
    processing: bool,
    speech_started_at: Option<Instant>,
    transcription: String,
    summary: String,
    request: Option<Arc<AnalysisRequest>>,
}

/// Turns server events into listener notifications and drives the active
/// [`AnalysisRequest`] to resolution.
pub struct EventDispatcher {
    notifier: Notifier,
    transcription_wait: Duration,
    single_shot: bool,
    state: Mutex<DispatchState>,
}

impl EventDispatcher {
    pub fn new(notifier: Notifier, transcription_wait: Duration) -> Self {
        Self {
            notifier,
            transcription_wait,
            single_shot: false,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Once a request has been attached, replies outside it are dropped
    /// instead of being reported as unsolicited summaries.
    pub fn single_shot(mut self) -> Self {
        self.single_shot = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `request` the active one. Refused while another is still pending.
    pub fn begin_request(&self, request: Arc<AnalysisRequest>) -> bool {
        let mut state = self.lock();
        if let Some(current) = &state.request {
            if current.is_pending() {
                warn!(
                    "Request {} still pending, not starting {}",
                    current.id(),
                    request.id()
                );
                return false;
            }
        }
        debug!("Request {} active", request.id());
        state.request = Some(request);
        true
    }

    /// Forget the last request so unsolicited replies reach the listener again
    pub fn clear_request(&self) {
        self.lock().request = None;
    }

    pub fn active_request(&self) -> Option<Arc<AnalysisRequest>> {
        self.lock().request.clone().filter(|r| r.is_pending())
    }

    /// Application-level readiness (`session.created`/`session.updated` seen)
    pub fn session_ready(&self) -> bool {
        self.lock().session_ready
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    pub fn current_summary(&self) -> String {
        self.lock().summary.clone()
    }

    pub fn current_transcription(&self) -> String {
        self.lock().transcription.clone()
    }

    fn deliver(&self, result: &AnalysisResult) {
        let started = self.lock().speech_started_at;
        if let Some(started) = started {
            info!(
                "Analysis resolved {:.2}s after speech start",
                started.elapsed().as_secs_f64()
            );
        }
        self.notifier.summary(&result.summary, result.audio_type);
    }

    fn on_terminal(&self, text: &str) {
        let cleaned = strip_end_markers(text);
        let parsed = parse_response(&cleaned);
        debug!("Parsed reply as {:?}: {}", parsed.format, parsed.summary);

        let request = {
            let mut state = self.lock();
            state.processing = false;
            state.summary = parsed.summary.clone();
            state.request.clone()
        };

        let request = match request {
            Some(request) if request.is_pending() => request,
            Some(request) if self.single_shot || request.completion() != Completion::Resolved => {
                debug!(
                    "Request {} already {:?}, dropping late reply",
                    request.id(),
                    request.completion()
                );
                return;
            }
            _ => {
                self.notifier.summary(&parsed.summary, parsed.audio_type);
                return;
            }
        };

        match request.record_response(parsed, &cleaned) {
            ResponseOutcome::Resolved(result) => self.deliver(&result),
            ResponseOutcome::AwaitingTranscription => {
                debug!(
                    "Request {}: waiting up to {:?} for transcription",
                    request.id(),
                    self.transcription_wait
                );
                let waiting = Arc::clone(&request);
                let notifier = self.notifier.clone();
                let wait = self.transcription_wait;
                let timer = tokio::spawn(async move {
                    sleep(wait).await;
                    if let Some(result) = waiting.finish_wait() {
                        info!("Request {}: resolved without transcription", waiting.id());
                        notifier.summary(&result.summary, result.audio_type);
                    }
                });
                request.arm_wait_timer(timer);
            }
            ResponseOutcome::Ignored => {
                debug!("Request {}: duplicate terminal event ignored", request.id());
            }
        }
    }

    fn on_transcription(&self, text: &str) {
        let request = {
            let mut state = self.lock();
            state.transcription = text.to_string();
            state.request.clone()
        };
        self.notifier.transcription(text);

        if let Some(result) = request.and_then(|r| r.record_transcription(text)) {
            self.deliver(&result);
        }
    }
}

impl EventHandler for EventDispatcher {
    fn handle(&self, event: ServerEvent) {
        if let Some(text) = event.terminal_text() {
            self.on_terminal(text);
            return;
        }
        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                self.lock().session_ready = true;
                debug!("Session ready");
            }
            ServerEvent::SpeechStarted => {
                let mut state = self.lock();
                state.processing = true;
                state.speech_started_at = Some(Instant::now());
                state.summary.clear();
            }
            ServerEvent::SpeechStopped => debug!("Speech stopped"),
            ServerEvent::TranscriptionCompleted { text } => self.on_transcription(&text),
            ServerEvent::ResponseDelta { text } => self.lock().summary.push_str(&text),
            // handled above
            ServerEvent::ResponseDone { .. } | ServerEvent::ContentPartDone { .. } => {}
            ServerEvent::ErrorEvent { message } => warn!("Service error: {}", message),
            ServerEvent::Unknown(kind) => debug!("Ignoring event {}", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AudioType;

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(Notifier::headless(), Duration::from_secs(3))
    }

    #[test]
    fn session_events_mark_ready() {
        let d = dispatcher();
        assert!(!d.session_ready());
        d.handle(ServerEvent::SessionUpdated);
        assert!(d.session_ready());
    }

    #[test]
    fn deltas_accumulate_until_terminal() {
        let d = dispatcher();
        d.handle(ServerEvent::SpeechStarted);
        assert!(d.is_processing());
        d.handle(ServerEvent::ResponseDelta { text: "🎵:".into() });
        d.handle(ServerEvent::ResponseDelta { text: "军歌".into() });
        assert_eq!(d.current_summary(), "🎵:军歌");
        d.handle(ServerEvent::ResponseDone {
            text: "🎵:军歌嘹亮<|EOT|>".into(),
        });
        assert_eq!(d.current_summary(), "🎵:军歌嘹亮");
        assert!(!d.is_processing());
    }

    #[test]
    fn pending_request_blocks_a_new_one() {
        let d = dispatcher();
        let (first, _rx1) = AnalysisRequest::new();
        let (second, _rx2) = AnalysisRequest::new();
        assert!(d.begin_request(first.clone()));
        assert!(!d.begin_request(second.clone()));
        first.time_out();
        assert!(d.begin_request(second));
    }

    #[tokio::test]
    async fn late_reply_after_cancel_is_dropped() {
        let d = dispatcher();
        let (request, _rx) = AnalysisRequest::new();
        d.begin_request(request.clone());
        request.cancel();
        d.handle(ServerEvent::ResponseDone {
            text: "🎵:军歌嘹亮".into(),
        });
        assert_eq!(request.completion(), Completion::Cancelled);
        assert!(d.active_request().is_none());
    }

    #[tokio::test]
    async fn single_shot_reports_once() {
        let d = dispatcher().single_shot();
        let (request, rx) = AnalysisRequest::new();
        d.begin_request(request);
        d.handle(ServerEvent::TranscriptionCompleted { text: "hi".into() });
        d.handle(ServerEvent::ResponseDone {
            text: "😊:开心聊天".into(),
        });
        d.handle(ServerEvent::ContentPartDone {
            text: "💬:另一段".into(),
        });
        assert_eq!(rx.await.unwrap().summary, "😊:开心聊天");
        assert_eq!(d.current_summary(), "💬:另一段");
    }

    #[tokio::test]
    async fn transcript_before_response_resolves_immediately() {
        let d = dispatcher();
        let (request, rx) = AnalysisRequest::new();
        d.begin_request(request);
        d.handle(ServerEvent::TranscriptionCompleted {
            text: "我们开会吧".into(),
        });
        d.handle(ServerEvent::ContentPartDone {
            text: "状态：会议讨论".into(),
        });
        let result = rx.await.unwrap();
        assert_eq!(result.summary, "会议讨论");
        assert_eq!(result.transcription, "我们开会吧");
        assert_eq!(result.audio_type, AudioType::Conversation);
    }
}
