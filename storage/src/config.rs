use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file configuration
    pub database: DatabaseConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Query configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Database file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    pub path: PathBuf,

    /// Maximum number of reader connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a connection waits on a locked database, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Reject writes for devices missing from the registry
    #[serde(default = "default_true")]
    pub enforce_foreign_keys: bool,

    /// Create the database file if it does not exist
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

impl DatabaseConfig {
    /// Get busy timeout as Duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Largest batch accepted by a single `write_points_batch` call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum points held by the in-process ingest buffer
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Rows fetched per page by lazy cursors
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound for `latest_points` limits
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

/// Data retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Metric points older than this many hours are pruned
    #[serde(default = "default_points_horizon_hours")]
    pub points_horizon_hours: u64,

    /// Status snapshots older than this many hours are pruned
    #[serde(default = "default_snapshots_horizon_hours")]
    pub snapshots_horizon_hours: u64,

    /// Rows deleted per retention transaction
    #[serde(default = "default_delete_chunk_size")]
    pub delete_chunk_size: usize,

    /// Seconds between scheduled retention passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl RetentionConfig {
    /// Points horizon as a chrono Duration
    pub fn points_horizon(&self) -> Result<chrono::Duration> {
        horizon("retention.points_horizon_hours", self.points_horizon_hours)
    }

    /// Snapshots horizon as a chrono Duration
    pub fn snapshots_horizon(&self) -> Result<chrono::Duration> {
        horizon("retention.snapshots_horizon_hours", self.snapshots_horizon_hours)
    }

    /// Scheduler interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn horizon(name: &str, hours: u64) -> Result<chrono::Duration> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| StorageError::ConfigError(format!("{} = {} is out of range", name, hours)))
}

// Default value functions
fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    5000
}

fn default_max_buffer_size() -> usize {
    10000
}

fn default_page_size() -> usize {
    500
}

fn default_max_limit() -> usize {
    10000
}

fn default_points_horizon_hours() -> u64 {
    7 * 24
}

fn default_snapshots_horizon_hours() -> u64 {
    30 * 24
}

fn default_delete_chunk_size() -> usize {
    1000
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            points_horizon_hours: default_points_horizon_hours(),
            snapshots_horizon_hours: default_snapshots_horizon_hours(),
            delete_chunk_size: default_delete_chunk_size(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::with_path("rig-telemetry.db")
    }
}

impl StorageConfig {
    /// Default configuration for a database at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: path.into(),
                max_connections: default_max_connections(),
                busy_timeout_ms: default_busy_timeout_ms(),
                enforce_foreign_keys: true,
                create_if_missing: true,
            },
            ingestion: IngestionConfig::default(),
            query: QueryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Self::from_yaml(&contents)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: StorageConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| StorageError::ConfigError(e.to_string()))?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let path = self.database.path.as_os_str();
        if path.is_empty() {
            return Err(StorageError::ConfigError("database.path is empty".to_string()));
        }
        if path == ":memory:" {
            return Err(StorageError::ConfigError(
                "database.path must be a file; in-memory databases cannot be shared between reader and writer pools".to_string(),
            ));
        }

        let checks = [
            ("database.max_connections", self.database.max_connections as u64),
            ("ingestion.max_batch_size", self.ingestion.max_batch_size as u64),
            ("ingestion.max_buffer_size", self.ingestion.max_buffer_size as u64),
            ("query.page_size", self.query.page_size as u64),
            ("query.max_limit", self.query.max_limit as u64),
            ("retention.delete_chunk_size", self.retention.delete_chunk_size as u64),
            ("retention.interval_secs", self.retention.interval_secs),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(StorageError::ConfigError(format!("{} must be greater than zero", name)));
            }
        }

        self.retention.points_horizon()?;
        self.retention.snapshots_horizon()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.database.max_connections, 8);
        assert!(config.database.enforce_foreign_keys);
        assert_eq!(config.ingestion.max_batch_size, 5000);
        assert_eq!(config.retention.points_horizon_hours, 168);
        assert_eq!(config.retention.snapshots_horizon_hours, 720);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_defaults_fill_missing_sections() {
        let yaml = r#"
database:
  path: /var/lib/rigs/telemetry.db
retention:
  points_horizon_hours: 24
"#;
        let config = StorageConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/rigs/telemetry.db"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.retention.points_horizon_hours, 24);
        assert_eq!(config.retention.snapshots_horizon_hours, 720);
        assert_eq!(config.query.page_size, 500);
    }

    #[test]
    fn test_yaml_serialization() {
        let config = StorageConfig::with_path("/tmp/rigs.db");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("database:"));
        assert!(yaml.contains("retention:"));

        let parsed: StorageConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.database.path, config.database.path);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = StorageConfig::default();
        config.query.page_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("query.page_size"));
    }

    #[test]
    fn test_validate_rejects_oversized_horizons() {
        let mut config = StorageConfig::default();
        config.retention.points_horizon_hours = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
        assert!(err.to_string().contains("retention.points_horizon_hours"));

        let mut config = StorageConfig::default();
        config.retention.snapshots_horizon_hours = 4_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(StorageError::ConfigError(_))));
        assert!(config.retention.snapshots_horizon().is_err());
        assert_eq!(config.retention.points_horizon().unwrap(), chrono::Duration::hours(168));
    }

    #[test]
    fn test_validate_rejects_memory_path() {
        let config = StorageConfig::with_path(":memory:");
        assert!(matches!(config.validate(), Err(StorageError::ConfigError(_))));
    }
}
