use super::state::{AppState, JobStatus};
use crate::analysis::{AnalysisAudio, AnalysisInput, AnalysisOutcome, AnalysisResult};
use crate::connection::ConnectionStatus;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAnalysisRequest {
    /// Fetchable URL of the recorded asset
    pub asset_url: Option<String>,

    /// Inline audio (WAV or raw PCM16), base64-encoded
    pub audio_base64: Option<String>,

    pub duration_secs: u32,

    /// Storage key used to reuse and persist the analysis
    pub asset_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateAnalysisResponse {
    pub analysis_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisStatusResponse {
    pub analysis_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatusResponse {
    pub status: ConnectionStatus,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn status_response(analysis_id: Uuid, status: &JobStatus) -> AnalysisStatusResponse {
    let (status, result) = match status {
        JobStatus::Pending => ("pending", None),
        JobStatus::Completed(result) => ("completed", Some(result.clone())),
        JobStatus::Cancelled => ("cancelled", None),
    };
    AnalysisStatusResponse {
        analysis_id,
        status: status.to_string(),
        result,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /analyses
/// Start a background analyze-and-persist job
pub async fn create_analysis(
    State(state): State<AppState>,
    Json(req): Json<CreateAnalysisRequest>,
) -> impl IntoResponse {
    let audio = match (req.asset_url, req.audio_base64) {
        (Some(url), _) => AnalysisAudio::Url(url),
        (None, Some(encoded)) => match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => AnalysisAudio::Bytes(bytes),
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("audio_base64 is not valid base64: {}", e),
                )
            }
        },
        (None, None) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Either asset_url or audio_base64 is required".to_string(),
            )
        }
    };

    let job = state.analyzer.start(AnalysisInput {
        audio,
        duration_secs: req.duration_secs,
        asset_ref: req.asset_ref,
    });
    let analysis_id = job.id();

    state
        .jobs
        .write()
        .await
        .insert(analysis_id, job.cancel_handle());

    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let status = match job.outcome().await {
            AnalysisOutcome::Completed(result) => JobStatus::Completed(result),
            AnalysisOutcome::Cancelled => JobStatus::Cancelled,
        };
        jobs.write().await.finish(analysis_id, status);
    });

    info!("Analysis {} accepted", analysis_id);

    (
        StatusCode::ACCEPTED,
        Json(CreateAnalysisResponse {
            analysis_id,
            status: "pending".to_string(),
        }),
    )
        .into_response()
}

/// GET /analyses/:analysis_id
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> impl IntoResponse {
    let mut jobs = state.jobs.write().await;

    match jobs.get(&analysis_id) {
        Some(entry) => (
            StatusCode::OK,
            Json(status_response(analysis_id, &entry.status)),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Analysis {} not found", analysis_id),
        ),
    }
}

/// DELETE /analyses/:analysis_id
/// Cancel an in-flight analysis
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> impl IntoResponse {
    let mut jobs = state.jobs.write().await;

    match jobs.get(&analysis_id) {
        Some(entry) => match entry.status {
            JobStatus::Pending => {
                info!("Cancelling analysis {}", analysis_id);
                entry.cancel.cancel();
                (
                    StatusCode::ACCEPTED,
                    Json(status_response(analysis_id, &entry.status)),
                )
                    .into_response()
            }
            _ => {
                warn!("Analysis {} already finished", analysis_id);
                error_response(
                    StatusCode::CONFLICT,
                    format!("Analysis {} already finished", analysis_id),
                )
            }
        },
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Analysis {} not found", analysis_id),
        ),
    }
}

/// GET /connection/status
/// Status of the live recording connection
pub async fn connection_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state
        .live
        .as_ref()
        .map(|live| live.status())
        .unwrap_or(ConnectionStatus::Disconnected);

    (
        StatusCode::OK,
        Json(ConnectionStatusResponse {
            status,
            label: status.label().to_string(),
        }),
    )
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
