use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;

/// Configuration for a live recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "memo-2025-10-28-morning")
    pub session_id: String,

    /// Sample rate of captured chunks (the service expects 16kHz)
    pub sample_rate: u32,

    /// Voice the service answers with
    pub voice: String,

    /// How long a committed turn may stay unanswered before it is abandoned
    pub result_timeout: Duration,

    /// How long a reply waits for its transcription
    pub transcription_wait: Duration,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.analysis.sample_rate,
            voice: config.realtime.voice.clone(),
            result_timeout: config.analysis.overall_timeout(),
            transcription_wait: config.analysis.transcription_wait(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("memo-{}", uuid::Uuid::new_v4()),
            sample_rate: 16000,
            voice: "qingchunshaonv".to_string(),
            result_timeout: Duration::from_secs(30),
            transcription_wait: Duration::from_secs(3),
        }
    }
}
