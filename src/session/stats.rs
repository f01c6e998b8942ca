use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionStatus;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Whether recording is currently active
    pub is_recording: bool,

    /// When the current (or last) recording started
    pub started_at: DateTime<Utc>,

    /// Recording duration in seconds
    pub duration_secs: f64,

    /// Audio chunks accepted by the transport
    pub chunks_sent: usize,

    /// Number of transcript segments received
    pub transcript_segments_count: usize,

    pub connection_status: ConnectionStatus,
}

/// One completed transcription from the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}
