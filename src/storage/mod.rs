//! Storage boundary: asset upload and analysis persistence.

pub mod cache;
pub mod memory;

pub use cache::AnalysisCache;
pub use memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisResult, AudioType, ResultSource};
use crate::error::StorageError;

/// A persisted analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub asset_ref: String,
    pub summary: String,
    pub transcription: String,
    pub audio_type: AudioType,
    pub source: ResultSource,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(asset_ref: &str, result: &AnalysisResult, confidence: f32) -> Self {
        Self {
            asset_ref: asset_ref.to_string(),
            summary: result.summary.clone(),
            transcription: result.transcription.clone(),
            audio_type: result.audio_type,
            source: result.source,
            confidence,
            created_at: Utc::now(),
        }
    }

    pub fn into_result(self) -> AnalysisResult {
        AnalysisResult {
            summary: self.summary,
            transcription: self.transcription,
            audio_type: self.audio_type,
            source: self.source,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store raw audio and return a fetchable URL
    async fn upload_asset(&self, owner_id: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    async fn persist_analysis(
        &self,
        asset_ref: &str,
        result: &AnalysisResult,
        confidence: f32,
    ) -> Result<(), StorageError>;

    async fn fetch_existing_analysis(
        &self,
        asset_ref: &str,
    ) -> Result<Option<AnalysisRecord>, StorageError>;
}
