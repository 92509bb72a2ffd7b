//! Configuration management for the ZoneSync daemon.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default remote poll interval in seconds, used when a data-log shard is
/// caught up with the source.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

/// Default number of concurrent per-object tasks per bucket-shard worker.
pub const DEFAULT_SPAWN_WINDOW: usize = 20;

/// Default batch size for log-store and remote listing calls.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default marker-persist window for data-log shards.
pub const DEFAULT_DATA_MARKER_WINDOW: usize = 1;

/// Default marker-persist window for bucket shards.
pub const DEFAULT_BUCKET_MARKER_WINDOW: usize = 10;

/// Default advisory lease duration in seconds.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 30;

/// Main configuration for the ZoneSync daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source zone to replicate from.
    pub source: SourceConfig,
    /// Log-store backend configuration.
    pub store: StoreConfig,
    /// Replication engine tuning.
    pub sync: SyncTuning,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// Source zone connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Name of the source zone.
    pub zone: String,
    /// Base URL of the source zone's admin endpoint.
    pub endpoint: String,
    /// Optional access key for authentication.
    pub access_key: Option<String>,
    /// Optional secret key for authentication.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            zone: "source".to_string(),
            endpoint: "http://127.0.0.1:8000".to_string(),
            access_key: None,
            secret_key: None,
            timeout_ms: 30_000,
        }
    }
}

impl SourceConfig {
    /// Returns the request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log-store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable redb-backed store.
    #[default]
    Redb,
    /// In-memory store; progress is lost on restart.
    Memory,
}

/// Log-store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend persists sync status and the full-sync index.
    pub backend: StoreBackend,
    /// Database path for the redb backend.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::Redb, path: PathBuf::from("zonesync.redb") }
    }
}

/// Tuning knobs for the replication engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Seconds to sleep when a data-log shard is caught up.
    pub poll_interval_secs: u64,
    /// Maximum concurrent per-object tasks per bucket-shard worker.
    pub spawn_window: usize,
    /// Entries fetched per log-store omap read or remote log poll.
    pub batch_size: usize,
    /// Completed entries between marker persists for data-log shards.
    pub data_marker_window: usize,
    /// Completed entries between marker persists for bucket shards.
    pub bucket_marker_window: usize,
    /// Advisory lease duration in seconds for status initialization.
    pub lease_ttl_secs: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            spawn_window: DEFAULT_SPAWN_WINDOW,
            batch_size: DEFAULT_BATCH_SIZE,
            data_marker_window: DEFAULT_DATA_MARKER_WINDOW,
            bucket_marker_window: DEFAULT_BUCKET_MARKER_WINDOW,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

impl SyncTuning {
    /// Creates tuning with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }

    /// Sets the spawn window.
    pub fn spawn_window(mut self, window: usize) -> Self {
        self.spawn_window = window;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Returns the poll interval as a `Duration`.
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the lease TTL as a `Duration`.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Validates the tuning values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.spawn_window == 0 {
            return Err(crate::Error::Config("spawn_window must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(crate::Error::Config("batch_size must be at least 1".into()));
        }
        if self.data_marker_window == 0 || self.bucket_marker_window == 0 {
            return Err(crate::Error::Config("marker windows must be at least 1".into()));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source.zone, "source");
        assert_eq!(config.sync.poll_interval_secs, 20);
        assert_eq!(config.sync.spawn_window, 20);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.data_marker_window, 1);
        assert_eq!(config.sync.bucket_marker_window, 10);
        assert_eq!(config.store.backend, StoreBackend::Redb);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
            [source]
            zone = "us-east"
            endpoint = "http://gateway.us-east:8000"

            [store]
            backend = "memory"

            [sync]
            poll_interval_secs = 5

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.source.zone, "us-east");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.sync.poll_interval_secs, 5);
        // Unset fields keep their defaults.
        assert_eq!(config.sync.spawn_window, 20);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_tuning_builder() {
        let tuning = SyncTuning::new()
            .poll_interval(Duration::from_secs(1))
            .spawn_window(4)
            .batch_size(10);
        assert_eq!(tuning.poll_interval_secs, 1);
        assert_eq!(tuning.spawn_window, 4);
        assert_eq!(tuning.batch_size, 10);
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn test_tuning_validation() {
        assert!(SyncTuning::new().spawn_window(0).validate().is_err());
        assert!(SyncTuning::new().batch_size(0).validate().is_err());
        let tuning = SyncTuning { data_marker_window: 0, ..Default::default() };
        assert!(tuning.validate().is_err());
    }
}
