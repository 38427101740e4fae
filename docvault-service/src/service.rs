//! Service coordinator: owns the collaborators and exposes document
//! operations to the HTTP layer and the worker pool.

mod document_processing;
#[cfg(test)]
pub(crate) mod testing;

pub use document_processing::{
    DocumentDetail, DownloadUrl, NoopStageHook, PipelineOutcome, Stage, StageContext, StageHook,
    WorkQueue,
};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use self::document_processing::ProcessingTokens;
use crate::config::RuntimeConfig;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::{OcrStage, TextExtractor};
use crate::storage::ContentStore;

/// Main service coordinator
pub struct DocVaultService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub store: Arc<dyn ContentStore>,
    extractor: Arc<dyn TextExtractor>,
    ocr: Arc<OcrStage>,
    hooks: Arc<dyn StageHook>,
    queue: WorkQueue,
    /// Tokens for in-flight pipeline runs, keyed by document id
    processing_cancellation_tokens: Arc<ProcessingTokens>,
    /// Serializes version number allocation per document
    version_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DocVaultService {
    /// Assemble the service from already-constructed collaborators
    pub fn new(
        db: Arc<Database>,
        runtime_config: Arc<RuntimeConfig>,
        store: Arc<dyn ContentStore>,
        extractor: Arc<dyn TextExtractor>,
        ocr: Arc<OcrStage>,
        hooks: Arc<dyn StageHook>,
        queue: WorkQueue,
    ) -> Self {
        info!("Initializing DocVault service");

        Self {
            runtime_config,
            db,
            store,
            extractor,
            ocr,
            hooks,
            queue,
            processing_cancellation_tokens: Arc::new(DashMap::new()),
            version_locks: DashMap::new(),
        }
    }

    /// Hold while choosing and storing the next version of a document
    pub(crate) async fn lock_versions(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .version_locks
            .entry(document_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub(crate) fn forget_version_lock(&self, document_id: &str) {
        self.version_locks.remove(document_id);
    }

    /// Current effective settings as a flat key/value map
    pub fn get_settings(&self) -> HashMap<String, serde_json::Value> {
        self.runtime_config.dynamic().to_key_value_map()
    }

    /// Update settings and hot-reload the dynamic config
    pub fn update_settings(&self, updates: HashMap<String, serde_json::Value>) -> ServiceResult<()> {
        let valid_keys = crate::config::DynamicConfig::valid_keys();
        let mut unknown: Vec<&str> = updates
            .keys()
            .map(String::as_str)
            .filter(|key| !valid_keys.contains(key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(ServiceError::InvalidRequest {
                message: format!("Unknown setting keys: {}", unknown.join(", ")),
            });
        }

        let mut invalid: Vec<String> = updates
            .iter()
            .filter_map(|(key, value)| {
                crate::config::DynamicConfig::validate_setting(key, value)
                    .err()
                    .map(|reason| format!("{}: {}", key, reason))
            })
            .collect();
        if !invalid.is_empty() {
            invalid.sort_unstable();
            return Err(ServiceError::InvalidRequest {
                message: format!("Invalid setting values: {}", invalid.join("; ")),
            });
        }

        // Persist to DB
        self.db.set_settings(updates)?;

        // Reload config from DB; components read config fresh per run
        self.runtime_config.reload_from_db(&self.db)?;

        Ok(())
    }
}
