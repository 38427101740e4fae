use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
/// These settings affect server binding, storage layout, or the worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_worker")]
    pub worker: WorkerConfig,

    #[serde(default = "default_ocr_engine")]
    pub ocr: OcrEngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for the SQLite database and the object store (`objects/`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Externally reachable base URL used when building pre-signed URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// HMAC key for pre-signed URLs. When empty a random key is generated at
    /// startup, so URLs do not survive a restart.
    #[serde(default)]
    pub signing_secret: String,
}

impl StorageConfig {
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docvault.db")
    }
}

/// Background worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum pipeline runs executing at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bounded work queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// OCR executable. Startup-only so the settings API cannot choose what runs.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrEngineConfig {
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_ocr")]
    pub ocr: OcrConfig,

    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,

    #[serde(default = "default_presign")]
    pub storage: PresignConfig,
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

/// OCR fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_enabled")]
    pub enabled: bool,

    /// PDFs whose extracted text (trimmed) has fewer characters than this are
    /// treated as scanned and sent through OCR
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    /// Tesseract language code(s), e.g. "eng" or "eng+deu"
    #[serde(default = "default_ocr_language")]
    pub language: String,

    /// Target pixel width when rasterizing PDF pages for recognition
    #[serde(default = "default_render_width")]
    pub render_width: u32,
}

/// Pipeline supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wall-clock limit for a single pipeline run
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// How long a timed-out run gets to wind down after cancellation before
    /// its task is aborted
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

impl PipelineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

/// Pre-signed URL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignConfig {
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
}

impl PresignConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        default_ocr()
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            ocr: default_ocr(),
            pipeline: default_pipeline(),
            storage: default_presign(),
        }
    }
}

// ==================== DynamicConfig Settings Keys ====================

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &[
    "limits.max_document_size_bytes",
    "ocr.enabled",
    "ocr.min_text_length",
    "ocr.language",
    "ocr.render_width",
    "pipeline.run_timeout_secs",
    "pipeline.cancel_grace_secs",
    "storage.presign_ttl_secs",
];

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        map.insert(
            "limits.max_document_size_bytes".to_string(),
            serde_json::json!(self.limits.max_document_size_bytes),
        );

        map.insert(
            "ocr.enabled".to_string(),
            serde_json::json!(self.ocr.enabled),
        );
        map.insert(
            "ocr.min_text_length".to_string(),
            serde_json::json!(self.ocr.min_text_length),
        );
        map.insert(
            "ocr.language".to_string(),
            serde_json::Value::String(self.ocr.language.clone()),
        );
        map.insert(
            "ocr.render_width".to_string(),
            serde_json::json!(self.ocr.render_width),
        );

        map.insert(
            "pipeline.run_timeout_secs".to_string(),
            serde_json::json!(self.pipeline.run_timeout_secs),
        );
        map.insert(
            "pipeline.cancel_grace_secs".to_string(),
            serde_json::json!(self.pipeline.cancel_grace_secs),
        );

        map.insert(
            "storage.presign_ttl_secs".to_string(),
            serde_json::json!(self.storage.presign_ttl_secs),
        );

        map
    }

    /// Apply DB settings as overrides to this config
    pub fn merge_from_db(&mut self, db_settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in db_settings {
            self.apply_setting(key, value);
        }
    }

    /// Apply a single setting value
    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            "limits.max_document_size_bytes" => {
                if let Some(v) = value.as_u64() {
                    self.limits.max_document_size_bytes = v;
                }
            }

            "ocr.enabled" => {
                if let Some(v) = value.as_bool() {
                    self.ocr.enabled = v;
                }
            }
            "ocr.min_text_length" => {
                if let Some(v) = value.as_u64().and_then(|v| usize::try_from(v).ok()) {
                    self.ocr.min_text_length = v;
                }
            }
            "ocr.language" => {
                if let Some(v) = value.as_str() {
                    self.ocr.language = v.to_string();
                }
            }
            "ocr.render_width" => {
                if let Some(v) = value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                    self.ocr.render_width = v;
                }
            }

            "pipeline.run_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.pipeline.run_timeout_secs = v;
                }
            }
            "pipeline.cancel_grace_secs" => {
                if let Some(v) = value.as_u64() {
                    self.pipeline.cancel_grace_secs = v;
                }
            }

            "storage.presign_ttl_secs" => {
                if let Some(v) = value.as_u64() {
                    self.storage.presign_ttl_secs = v;
                }
            }

            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }

    /// Check a value before it is stored. `null` clears an override and is
    /// always accepted; anything else must fit the field it targets.
    pub fn validate_setting(key: &str, value: &serde_json::Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }

        match key {
            "limits.max_document_size_bytes" => bounded_u64(value, 1, u64::MAX).map(drop),
            "ocr.enabled" => value
                .as_bool()
                .map(drop)
                .ok_or_else(|| "expected a boolean".to_string()),
            "ocr.min_text_length" => bounded_u64(value, 0, u64::MAX).and_then(|v| {
                usize::try_from(v)
                    .map(drop)
                    .map_err(|_| format!("{} does not fit this platform", v))
            }),
            "ocr.language" => match value.as_str() {
                Some(v) if !v.trim().is_empty() => Ok(()),
                _ => Err("expected a non-empty string".to_string()),
            },
            "ocr.render_width" => bounded_u64(value, 1, MAX_RENDER_WIDTH).map(drop),
            "pipeline.run_timeout_secs" => bounded_u64(value, 1, MAX_RUN_TIMEOUT_SECS).map(drop),
            "pipeline.cancel_grace_secs" => bounded_u64(value, 0, MAX_CANCEL_GRACE_SECS).map(drop),
            "storage.presign_ttl_secs" => bounded_u64(value, 1, MAX_PRESIGN_TTL_SECS).map(drop),
            _ => Err("unknown setting".to_string()),
        }
    }
}

const MAX_RENDER_WIDTH: u64 = 10_000;
const MAX_RUN_TIMEOUT_SECS: u64 = 86_400;
const MAX_CANCEL_GRACE_SECS: u64 = 600;
const MAX_PRESIGN_TTL_SECS: u64 = 604_800;

fn bounded_u64(value: &serde_json::Value, min: u64, max: u64) -> Result<u64, String> {
    let v = value
        .as_u64()
        .ok_or_else(|| "expected a non-negative integer".to_string())?;
    if (min..=max).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{} is outside {}..={}", v, min, max))
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    /// Build from already-loaded parts (used by tests and by `load`)
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Owned snapshot for work that outlives a single borrow (e.g. across awaits)
    pub fn snapshot(&self) -> Arc<DynamicConfig> {
        self.dynamic.load_full()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load dynamic config from all sources with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);

        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn config_sources() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DOCVAULT")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        public_base_url: default_public_base_url(),
        signing_secret: String::new(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ocr_engine() -> OcrEngineConfig {
    OcrEngineConfig {
        tesseract_cmd: default_tesseract_cmd(),
    }
}

fn default_worker() -> WorkerConfig {
    WorkerConfig {
        concurrency: default_concurrency(),
        queue_capacity: default_queue_capacity(),
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
    }
}

fn default_max_document_size() -> u64 {
    104_857_600 // 100MB
}

fn default_ocr() -> OcrConfig {
    OcrConfig {
        enabled: default_ocr_enabled(),
        min_text_length: default_min_text_length(),
        language: default_ocr_language(),
        render_width: default_render_width(),
    }
}

fn default_ocr_enabled() -> bool {
    true
}

fn default_min_text_length() -> usize {
    100
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}

fn default_render_width() -> u32 {
    2000
}

fn default_pipeline() -> PipelineConfig {
    PipelineConfig {
        run_timeout_secs: default_run_timeout_secs(),
        cancel_grace_secs: default_cancel_grace_secs(),
    }
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_cancel_grace_secs() -> u64 {
    10
}

fn default_presign() -> PresignConfig {
    PresignConfig {
        presign_ttl_secs: default_presign_ttl_secs(),
    }
}

fn default_presign_ttl_secs() -> u64 {
    3600
}

#[cfg(test)]
pub(crate) fn test_static_config(data_dir: &std::path::Path) -> StaticConfig {
    StaticConfig {
        server: default_server(),
        storage: StorageConfig {
            data_dir: data_dir.to_path_buf(),
            public_base_url: default_public_base_url(),
            signing_secret: "test-secret".to_string(),
        },
        worker: default_worker(),
        ocr: default_ocr_engine(),
    }
}
