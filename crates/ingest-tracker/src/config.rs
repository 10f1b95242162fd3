//! Configuration for the ingest tracker

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Tracking store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Version tracking configuration
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Extraction job driver configuration
    #[serde(default)]
    pub driver: DriverConfig,
    /// OCR job provider configuration
    #[serde(default)]
    pub ocr: OcrConfig,
    /// Notification bus configuration
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Blob store configuration
    #[serde(default)]
    pub blobs: BlobConfig,
    /// Extraction processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl TrackerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `INGEST_TRACKER_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INGEST_TRACKER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("INGEST_TRACKER_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid INGEST_TRACKER_PORT: {}", port),
            }
        }
        if let Ok(path) = std::env::var("INGEST_TRACKER_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("INGEST_TRACKER_OCR_URL") {
            self.ocr.base_url = url;
        }
        if let Ok(token) = std::env::var("INGEST_TRACKER_OCR_TOKEN") {
            self.ocr.api_token = Some(token);
        }
    }

    /// Reject configurations the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        let d = &self.driver;
        if d.start_max_attempts == 0 || d.poll_max_attempts == 0 {
            return Err(Error::Config("driver attempt ceilings must be at least 1".to_string()));
        }
        if d.max_poll_rounds == 0 {
            return Err(Error::Config("driver.max_poll_rounds must be at least 1".to_string()));
        }
        if d.max_delay_ms < d.base_delay_ms {
            return Err(Error::Config(
                "driver.max_delay_ms must not be below driver.base_delay_ms".to_string(),
            ));
        }
        if self.tracking.history_limit == 0 {
            return Err(Error::Config("tracking.history_limit must be at least 1".to_string()));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.tracking.retention_days) {
            return Err(Error::Config(format!(
                "tracking.retention_days must be within 1..={}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Tracking store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ingest-tracker")
            .join("tracking.db");
        Self { path }
    }
}

/// Version tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Versions returned in the trailing history of a status summary
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Days a record is retained before it may be reclaimed
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Upper bound for `tracking.retention_days` (about a century)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

fn default_history_limit() -> usize { 5 }
fn default_retention_days() -> i64 { 30 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            retention_days: default_retention_days(),
        }
    }
}

/// Resilient job driver configuration.
///
/// Start and poll/fetch calls share the backoff curve but have separate
/// attempt ceilings: polling runs many more calls against the provider and
/// hits its rate limit more often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds (applied before jitter)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay, in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Attempt ceiling for starting a job
    #[serde(default = "default_start_max_attempts")]
    pub start_max_attempts: u32,
    /// Attempt ceiling for each status poll and result page fetch
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    /// Fixed wait between poll rounds in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll rounds before the driver gives up waiting
    #[serde(default = "default_max_poll_rounds")]
    pub max_poll_rounds: u32,
}

fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_jitter_ms() -> u64 { 1_000 }
fn default_start_max_attempts() -> u32 { 5 }
fn default_poll_max_attempts() -> u32 { 8 }
fn default_poll_interval_ms() -> u64 { 5_000 }
fn default_max_poll_rounds() -> u32 { 120 }

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            start_max_attempts: default_start_max_attempts(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_rounds: default_max_poll_rounds(),
        }
    }
}

impl DriverConfig {
    /// Wait between poll rounds
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on how long the driver waits for a job, ignoring backoff
    pub fn max_wait(&self) -> Duration {
        self.poll_interval() * self.max_poll_rounds
    }
}

/// OCR job provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Provider REST endpoint
    pub base_url: String,
    /// Optional bearer token
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_ocr_timeout() -> u64 { 30 }

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            api_token: None,
            timeout_secs: default_ocr_timeout(),
        }
    }
}

/// Notification bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Capacity of the in-process broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// When set, domain notifications are POSTed to this URL instead
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_channel_capacity() -> usize { 1024 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            webhook_url: None,
        }
    }
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory of the local blob store
    pub root: PathBuf,
    /// Key prefix for extracted text artifacts (default: "extracted/")
    #[serde(default = "default_extracted_prefix")]
    pub extracted_prefix: String,
}

fn default_extracted_prefix() -> String {
    "extracted/".to_string()
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ingest-tracker")
                .join("blobs"),
            extracted_prefix: default_extracted_prefix(),
        }
    }
}

/// Extraction processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Concurrent extraction jobs (default: CPU count, max 4)
    pub parallel_extractions: Option<usize>,
    /// Pending extraction requests buffered before submit blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize { 1000 }

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_extractions: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}
