use chrono::Timelike;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dispatcher::EventDispatcher;
use super::fallback;
use super::request::{AnalysisRequest, AnalysisResult, ResultSource};
use crate::audio::{encode_append_frames, normalize_pcm16};
use crate::config::{AnalysisConfig, Config, ConnectionConfig, RealtimeConfig};
use crate::connection::{Connector, HandshakeVariant, RealtimeConnection};
use crate::error::{AudioError, SendError};
use crate::observer::Notifier;
use crate::protocol::{ClientEvent, SessionConfiguration};
use crate::storage::Storage;

/// Confidence recorded for results produced by the realtime service
pub const REALTIME_CONFIDENCE: f32 = 0.95;
/// Confidence recorded for synthesized placeholder results
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

const VARIANT_PAUSE: Duration = Duration::from_secs(1);

/// Audio to analyze: a fetchable asset URL or bytes already in hand
#[derive(Debug, Clone)]
pub enum AnalysisAudio {
    Url(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub audio: AnalysisAudio,
    pub duration_secs: u32,
    /// Storage key for lookup and persistence
    pub asset_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed(AnalysisResult),
    Cancelled,
}

/// Cancels one analysis job. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A running upload-and-analyze operation
pub struct AnalysisJob {
    id: Uuid,
    cancel: CancelHandle,
    handle: JoinHandle<AnalysisOutcome>,
}

impl AnalysisJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop streaming and tear down the analysis connection. No result is
    /// reported for a cancelled job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn outcome(self) -> AnalysisOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Analysis job {} aborted: {}", self.id, e);
                AnalysisOutcome::Cancelled
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Post-hoc analysis of a recorded asset over a dedicated connection
#[derive(Clone)]
pub struct Analyzer {
    realtime: RealtimeConfig,
    connection: ConnectionConfig,
    analysis: AnalysisConfig,
    connector: Arc<dyn Connector>,
    notifier: Notifier,
    storage: Option<Arc<dyn Storage>>,
    http: reqwest::Client,
    local_hour: Arc<dyn Fn() -> u32 + Send + Sync>,
}

impl Analyzer {
    pub fn new(config: &Config, connector: Arc<dyn Connector>, notifier: Notifier) -> Self {
        Self {
            realtime: config.realtime.clone(),
            connection: config.connection.clone(),
            analysis: config.analysis.clone(),
            connector,
            notifier,
            storage: None,
            http: reqwest::Client::new(),
            local_hour: Arc::new(|| chrono::Local::now().hour()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Clock used to pick the fallback time-of-day bucket
    pub fn with_hour_source(mut self, hour: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.local_hour = Arc::new(hour);
        self
    }

    /// Run analyze-and-persist in the background
    pub fn start(&self, input: AnalysisInput) -> AnalysisJob {
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let analyzer = self.clone();
        info!(
            "Starting analysis {} ({}s of audio)",
            id, input.duration_secs
        );
        let handle =
            tokio::spawn(async move { analyzer.analyze_and_persist(input, cancel_rx).await });
        AnalysisJob {
            id,
            cancel: CancelHandle(Arc::new(cancel_tx)),
            handle,
        }
    }

    /// Reuse a stored analysis when there is one; otherwise analyze and
    /// persist. Persistence failures are logged and do not change the result.
    pub async fn analyze_and_persist(
        &self,
        input: AnalysisInput,
        mut cancel: watch::Receiver<bool>,
    ) -> AnalysisOutcome {
        if let (Some(storage), Some(asset_ref)) = (&self.storage, &input.asset_ref) {
            match storage.fetch_existing_analysis(asset_ref).await {
                Ok(Some(record)) => {
                    info!("Reusing stored analysis for {}", asset_ref);
                    let result = record.into_result();
                    self.notifier.summary(&result.summary, result.audio_type);
                    return AnalysisOutcome::Completed(result);
                }
                Ok(None) => {}
                Err(e) => warn!("Lookup for {} failed: {}", asset_ref, e),
            }
        }

        let outcome = self.analyze(&input, &mut cancel).await;

        if let (AnalysisOutcome::Completed(result), Some(storage), Some(asset_ref)) =
            (&outcome, &self.storage, &input.asset_ref)
        {
            let confidence = match result.source {
                ResultSource::Realtime => REALTIME_CONFIDENCE,
                ResultSource::Fallback => FALLBACK_CONFIDENCE,
            };
            if let Err(e) = storage.persist_analysis(asset_ref, result, confidence).await {
                error!("Failed to persist analysis for {}: {}", asset_ref, e);
            }
        }
        outcome
    }

    /// Always yields a result unless cancelled
    pub async fn analyze(
        &self,
        input: &AnalysisInput,
        cancel: &mut watch::Receiver<bool>,
    ) -> AnalysisOutcome {
        let loaded = tokio::select! {
            biased;
            _ = cancelled(cancel) => return AnalysisOutcome::Cancelled,
            loaded = self.load_pcm(&input.audio) => loaded,
        };
        let pcm = match loaded {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Audio unavailable ({}), using fallback", e);
                return self.fallback(input.duration_secs);
            }
        };

        let dispatcher = Arc::new(
            EventDispatcher::new(self.notifier.clone(), self.analysis.transcription_wait())
                .single_shot(),
        );
        let connection = RealtimeConnection::new(
            "analysis",
            self.connection.clone(),
            SessionConfiguration::analysis(&self.realtime.model, &self.realtime.voice),
            Arc::clone(&self.connector),
            dispatcher.clone(),
            Notifier::headless(),
        );

        let outcome = self
            .drive(&connection, &dispatcher, &pcm, input.duration_secs, cancel)
            .await;
        connection.disconnect().await;
        outcome
    }

    async fn drive(
        &self,
        connection: &RealtimeConnection,
        dispatcher: &EventDispatcher,
        pcm: &[u8],
        duration_secs: u32,
        cancel: &mut watch::Receiver<bool>,
    ) -> AnalysisOutcome {
        let connected = tokio::select! {
            biased;
            _ = cancelled(cancel) => return AnalysisOutcome::Cancelled,
            connected = self.establish(connection) => connected,
        };
        if !connected {
            warn!("All handshake variants failed, using fallback");
            return self.fallback(duration_secs);
        }

        let (request, mut result_rx) = AnalysisRequest::new();
        dispatcher.begin_request(Arc::clone(&request));
        let deadline = Instant::now() + self.analysis.overall_timeout();

        let streamed = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                request.cancel();
                info!("Request {} cancelled while streaming", request.id());
                return AnalysisOutcome::Cancelled;
            }
            _ = sleep_until(deadline) => {
                if request.time_out() {
                    warn!("Request {} timed out while streaming, using fallback", request.id());
                    return self.fallback(duration_secs);
                }
                return match result_rx.try_recv() {
                    Ok(result) => AnalysisOutcome::Completed(result),
                    Err(_) => self.fallback(duration_secs),
                };
            }
            streamed = self.stream(connection, pcm) => streamed,
        };
        match streamed {
            Ok(frames) => info!("Request {}: streamed {} frames", request.id(), frames),
            Err(e) => {
                warn!("Request {}: streaming failed ({})", request.id(), e);
                if request.time_out() {
                    return self.fallback(duration_secs);
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                if request.cancel() {
                    info!("Request {} cancelled", request.id());
                    return AnalysisOutcome::Cancelled;
                }
                match result_rx.try_recv() {
                    Ok(result) => AnalysisOutcome::Completed(result),
                    Err(_) => AnalysisOutcome::Cancelled,
                }
            }
            waited = timeout_at(deadline, &mut result_rx) => match waited {
                Ok(Ok(result)) => AnalysisOutcome::Completed(result),
                Ok(Err(_)) => self.fallback(duration_secs),
                Err(_) if request.time_out() => {
                    warn!("Request {} timed out, using fallback", request.id());
                    self.fallback(duration_secs)
                }
                Err(_) => match result_rx.await {
                    Ok(result) => AnalysisOutcome::Completed(result),
                    Err(_) => self.fallback(duration_secs),
                },
            },
        }
    }

    /// Try each handshake variant until one connects
    async fn establish(&self, connection: &RealtimeConnection) -> bool {
        let limit = self.connection.connect_timeout() + Duration::from_secs(1);
        for (i, variant) in HandshakeVariant::ALL.into_iter().enumerate() {
            connection.connect_with(variant);
            if connection.wait_until_connected(limit).await {
                info!("Analysis connection up ({} handshake)", variant.name());
                return true;
            }
            warn!("Handshake variant {} failed", variant.name());
            connection.disconnect().await;
            if i + 1 < HandshakeVariant::ALL.len() {
                sleep(VARIANT_PAUSE).await;
            }
        }
        false
    }

    async fn stream(&self, connection: &RealtimeConnection, pcm: &[u8]) -> Result<usize, SendError> {
        let frames = encode_append_frames(pcm, self.analysis.chunk_chars);
        let count = frames.len();
        for frame in frames {
            connection.send(&ClientEvent::audio_append(frame)).await?;
        }
        connection.send(&ClientEvent::audio_commit()).await?;
        connection.send(&ClientEvent::response_create()).await?;
        Ok(count)
    }

    async fn load_pcm(&self, audio: &AnalysisAudio) -> Result<Vec<u8>, AudioError> {
        let bytes = match audio {
            AnalysisAudio::Bytes(bytes) => bytes.clone(),
            AnalysisAudio::Url(url) => self.download(url).await?,
        };
        normalize_pcm16(&bytes)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, AudioError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AudioError::Download(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AudioError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn fallback(&self, duration_secs: u32) -> AnalysisOutcome {
        let result = fallback::synthesize((self.local_hour)(), duration_secs);
        info!("Fallback result: {}", result.summary);
        self.notifier.summary(&result.summary, result.audio_type);
        AnalysisOutcome::Completed(result)
    }
}
