//! Worker configuration.
//!
//! Loaded from a TOML file; every section has defaults so a minimal file (or
//! none at all in tests) yields a runnable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorOrigin, ReplicationError, Result};

/// Default number of in-flight entries per worker.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default maximum retry attempts per gateway call.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default wall-clock bound on one retry cycle, in seconds.
pub const DEFAULT_RETRY_TIMEOUT_S: u64 = 300;

/// Default minimum backoff between retries, in milliseconds.
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 1_000;

/// Default maximum backoff between retries, in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Default jitter fraction applied to each backoff.
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.1;

/// Default long-poll timeout for the bus consumer, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;

/// Main configuration for a Caravel worker process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Log bus connection.
    pub bus: BusConfig,
    /// Source object service connection.
    pub source: SourceConfig,
    /// Destination (cross-backend) service connection.
    pub destination: DestinationConfig,
    /// Retry behavior for gateway calls.
    pub retry: RetryConfig,
    /// Worker pool behavior.
    pub worker: WorkerConfig,
    /// Logging behavior.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::internal(ErrorOrigin::Local, format!("read config: {e}"))
        })?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ReplicationError::internal(ErrorOrigin::Local, format!("parse config: {e}"))
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(ReplicationError::internal(
                ErrorOrigin::Local,
                "worker concurrency must be at least 1",
            ));
        }
        if self.worker.site.is_empty() {
            return Err(ReplicationError::internal(
                ErrorOrigin::Local,
                "worker site must be set",
            ));
        }
        if self.destination.hosts.is_empty() {
            return Err(ReplicationError::internal(
                ErrorOrigin::Local,
                "at least one destination host is required",
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ReplicationError::internal(
                ErrorOrigin::Local,
                "backoff factor must be at least 1.0",
            ));
        }
        Ok(())
    }
}

/// Log bus connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus gateway endpoint.
    pub endpoint: String,
    /// Consumer group name.
    pub group: String,
    /// Topic carrying replication entries.
    pub topic: String,
    /// Topic receiving status publications.
    pub status_topic: String,
    /// Topic receiving metrics records.
    pub metrics_topic: String,
    /// Long-poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9440".to_string(),
            group: "caravel-replication".to_string(),
            topic: "replication".to_string(),
            status_topic: "replication-status".to_string(),
            metrics_topic: "metrics".to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

/// Source object service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source service endpoint.
    pub endpoint: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { endpoint: "http://127.0.0.1:8000".to_string() }
    }
}

/// Destination (cross-backend) service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Destination hosts, tried round-robin on target-side retries.
    pub hosts: Vec<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self { hosts: vec!["http://127.0.0.1:8001".to_string()] }
    }
}

/// Retry behavior for gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first failure.
    pub max_retries: u32,
    /// Wall-clock bound on one retry cycle, in seconds.
    pub timeout_s: u64,
    /// Minimum backoff in milliseconds.
    pub backoff_min_ms: u64,
    /// Maximum backoff in milliseconds.
    pub backoff_max_ms: u64,
    /// Backoff multiplier per retry.
    pub backoff_factor: f64,
    /// Jitter fraction in `[0, 1]` applied to each backoff.
    pub backoff_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_s: DEFAULT_RETRY_TIMEOUT_S,
            backoff_min_ms: DEFAULT_BACKOFF_MIN_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum retry attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry-cycle timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_s = timeout.as_secs();
        self
    }

    /// Sets the minimum backoff.
    #[must_use]
    pub fn backoff_min(mut self, min: Duration) -> Self {
        self.backoff_min_ms = min.as_millis() as u64;
        self
    }

    /// Sets the maximum backoff.
    #[must_use]
    pub fn backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    /// Returns the retry-cycle timeout as a `Duration`.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Worker pool behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Replication site this worker serves.
    pub site: String,
    /// Storage type of the site's backend (`aws_s3`, `gcp`, `azure`).
    pub storage_type: Option<String>,
    /// Maximum in-flight entries per worker.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { site: "replica".to_string(), storage_type: None, concurrency: DEFAULT_CONCURRENCY }
    }
}

/// Logging behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter, e.g. `info` or `caravel=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [worker]
            site = "paris"
            storage_type = "gcp"
            concurrency = 4

            [destination]
            hosts = ["http://dest-1:8001", "http://dest-2:8001"]
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.site, "paris");
        assert_eq!(config.worker.storage_type.as_deref(), Some("gcp"));
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.destination.hosts.len(), 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.bus.topic, "replication");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.destination.hosts.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.worker.site.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_builder() {
        let retry = RetryConfig::new()
            .max_retries(2)
            .timeout(Duration::from_secs(30))
            .backoff_min(Duration::from_millis(10))
            .backoff_max(Duration::from_millis(100));

        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.timeout_duration(), Duration::from_secs(30));
        assert_eq!(retry.backoff_min_ms, 10);
        assert_eq!(retry.backoff_max_ms, 100);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caravel.toml");
        std::fs::write(&path, "[worker]\nsite = \"tokyo\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.worker.site, "tokyo");

        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
