use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::audio_type::AudioType;
use super::parser::ParsedResponse;

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Realtime,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub transcription: String,
    pub audio_type: AudioType,
    pub source: ResultSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Resolved,
    TimedOut,
    Cancelled,
}

/// What happened to a terminal response
#[derive(Debug)]
pub enum ResponseOutcome {
    Resolved(AnalysisResult),
    /// Parked until the transcription arrives or the wait timer fires
    AwaitingTranscription,
    /// A response was already recorded, or the request is finished
    Ignored,
}

struct PendingSummary {
    parsed: ParsedResponse,
    /// Stand-in transcription if none ever arrives
    response_text: String,
}

struct RequestState {
    completion: Completion,
    transcription: Option<String>,
    pending: Option<PendingSummary>,
    wait_timer: Option<JoinHandle<()>>,
    result_tx: Option<oneshot::Sender<AnalysisResult>>,
}

/// One in-flight "transcribe and summarize" operation.
///
/// Resolution, timeout and cancellation all race for the same `result_tx`;
/// whichever takes it first under the lock wins and the others become no-ops.
pub struct AnalysisRequest {
    id: Uuid,
    started_at: Instant,
    state: Mutex<RequestState>,
}

impl AnalysisRequest {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<AnalysisResult>) {
        let (tx, rx) = oneshot::channel();
        let request = Arc::new(Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            state: Mutex::new(RequestState {
                completion: Completion::Pending,
                transcription: None,
                pending: None,
                wait_timer: None,
                result_tx: Some(tx),
            }),
        });
        (request, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn completion(&self) -> Completion {
        self.lock().completion
    }

    pub fn is_pending(&self) -> bool {
        self.completion() == Completion::Pending
    }

    /// Record the transcript (first one wins). Resolves the request when a
    /// summary is already waiting for it.
    pub fn record_transcription(&self, text: &str) -> Option<AnalysisResult> {
        let mut state = self.lock();
        if state.completion != Completion::Pending {
            return None;
        }
        if state.transcription.is_some() {
            debug!("Request {}: ignoring repeated transcription", self.id);
            return None;
        }
        state.transcription = Some(text.to_string());

        let pending = state.pending.take()?;
        Some(self.resolve(&mut state, pending))
    }

    pub fn record_response(&self, parsed: ParsedResponse, response_text: &str) -> ResponseOutcome {
        let mut state = self.lock();
        if state.completion != Completion::Pending || state.pending.is_some() {
            return ResponseOutcome::Ignored;
        }
        let pending = PendingSummary {
            parsed,
            response_text: response_text.to_string(),
        };
        if state.transcription.is_some() {
            return ResponseOutcome::Resolved(self.resolve(&mut state, pending));
        }
        state.pending = Some(pending);
        ResponseOutcome::AwaitingTranscription
    }

    /// Attach the transcription-wait timer so teardown can abort it.
    pub fn arm_wait_timer(&self, timer: JoinHandle<()>) {
        let mut state = self.lock();
        if state.completion != Completion::Pending {
            timer.abort();
            return;
        }
        if let Some(old) = state.wait_timer.replace(timer) {
            old.abort();
        }
    }

    /// The transcription wait elapsed: resolve with whatever is available.
    pub fn finish_wait(&self) -> Option<AnalysisResult> {
        let mut state = self.lock();
        if state.completion != Completion::Pending {
            return None;
        }
        state.wait_timer = None;
        let pending = state.pending.take()?;
        Some(self.resolve(&mut state, pending))
    }

    fn resolve(&self, state: &mut RequestState, pending: PendingSummary) -> AnalysisResult {
        let transcription = state
            .transcription
            .clone()
            .unwrap_or(pending.response_text);
        let result = AnalysisResult {
            summary: pending.parsed.summary,
            transcription,
            audio_type: pending.parsed.audio_type,
            source: ResultSource::Realtime,
        };
        state.completion = Completion::Resolved;
        if let Some(timer) = state.wait_timer.take() {
            timer.abort();
        }
        if let Some(tx) = state.result_tx.take() {
            let _ = tx.send(result.clone());
        }
        debug!(
            "Request {} resolved after {:.2}s",
            self.id,
            self.started_at.elapsed().as_secs_f64()
        );
        result
    }

    fn finish(&self, completion: Completion) -> bool {
        let mut state = self.lock();
        if state.completion != Completion::Pending {
            return false;
        }
        state.completion = completion;
        state.pending = None;
        state.result_tx = None;
        if let Some(timer) = state.wait_timer.take() {
            timer.abort();
        }
        true
    }

    /// Overall timeout fired. `true` if this call won the race.
    pub fn time_out(&self) -> bool {
        self.finish(Completion::TimedOut)
    }

    /// Cancelled by the caller. `true` if this call won the race.
    pub fn cancel(&self) -> bool {
        self.finish(Completion::Cancelled)
    }
}
