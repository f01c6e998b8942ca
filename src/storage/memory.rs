use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AnalysisCache, AnalysisRecord, Storage};
use crate::analysis::AnalysisResult;
use crate::config::StorageConfig;
use crate::error::StorageError;

/// Process-local storage, fronted by an [`AnalysisCache`]
pub struct InMemoryStorage {
    assets: RwLock<HashMap<String, Vec<u8>>>,
    records: RwLock<HashMap<String, AnalysisRecord>>,
    cache: RwLock<AnalysisCache>,
    fail_persist: AtomicBool,
}

impl InMemoryStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            assets: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            cache: RwLock::new(AnalysisCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            )),
            fail_persist: AtomicBool::new(false),
        }
    }

    /// Make the backing persist fail (the cache is still written)
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub async fn asset(&self, url: &str) -> Option<Vec<u8>> {
        self.assets.read().await.get(url).cloned()
    }

    pub async fn stored_record(&self, asset_ref: &str) -> Option<AnalysisRecord> {
        self.records.read().await.get(asset_ref).cloned()
    }

    pub async fn cached_record(&self, asset_ref: &str) -> Option<AnalysisRecord> {
        self.cache.write().await.get(asset_ref)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(&StorageConfig::default())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upload_asset(&self, owner_id: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Upload("empty asset".to_string()));
        }
        let url = format!("memory://{}/{}.wav", owner_id, Uuid::new_v4());
        debug!("Stored {} bytes at {}", bytes.len(), url);
        self.assets.write().await.insert(url.clone(), bytes);
        Ok(url)
    }

    async fn persist_analysis(
        &self,
        asset_ref: &str,
        result: &AnalysisResult,
        confidence: f32,
    ) -> Result<(), StorageError> {
        let record = AnalysisRecord::new(asset_ref, result, confidence);
        self.cache.write().await.insert(record.clone());

        if self.fail_persist.load(Ordering::SeqCst) {
            warn!("Persist for {} failed; cached only", asset_ref);
            return Err(StorageError::Persist(format!(
                "backing store rejected {}",
                asset_ref
            )));
        }
        self.records
            .write()
            .await
            .insert(asset_ref.to_string(), record);
        Ok(())
    }

    async fn fetch_existing_analysis(
        &self,
        asset_ref: &str,
    ) -> Result<Option<AnalysisRecord>, StorageError> {
        if let Some(record) = self.cache.write().await.get(asset_ref) {
            return Ok(Some(record));
        }
        Ok(self.records.read().await.get(asset_ref).cloned())
    }
}
