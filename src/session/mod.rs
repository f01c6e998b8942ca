//! Live recording session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - The dedicated live connection and its session configuration
//! - Streaming captured PCM16 chunks to the realtime service
//! - Smart-analysis follow-ups for every completed transcription
//! - Transcript collection and session statistics

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::{smart_analysis_prompt, LiveSession};
pub use stats::{SessionStats, TranscriptSegment};
