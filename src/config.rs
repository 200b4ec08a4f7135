//! Configuration for the flagfeed service
//!
//! Settings are read from an optional TOML file and then overridden by
//! environment variables prefixed with `FLAGFEED`, using `__` between
//! section and key:
//!
//! ```toml
//! [database]
//! path = "flagfeed.db"
//! storage_timeout_ms = 5000
//!
//! [statistics]
//! bucket_width_secs = 60
//! flush_period_secs = 10
//! cutoff_age_secs = 120
//! flush_on_shutdown = true
//!
//! [api]
//! addr = "127.0.0.1:8700"
//! ```
//!
//! `FLAGFEED__STATISTICS__FLUSH_PERIOD_SECS=5` overrides the flush period.

use crate::error::{FlagfeedError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FLAGFEED";

/// Complete configuration for the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagfeedConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub statistics: StatisticsSettings,

    #[serde(default)]
    pub api: ApiSettings,
}

/// Durable storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path, or ":memory:"
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Upper bound for a single storage call
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            storage_timeout_ms: default_storage_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

/// Statistics accumulation and flush settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSettings {
    /// Width of an interval bucket in seconds
    #[serde(default = "default_bucket_width")]
    pub bucket_width_secs: u64,

    /// FlushScheduler tick period in seconds
    #[serde(default = "default_flush_period")]
    pub flush_period_secs: u64,

    /// Age a bucket must reach before it is drained
    #[serde(default = "default_cutoff_age")]
    pub cutoff_age_secs: u64,

    /// Drain every pending bucket when the scheduler stops
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        Self {
            bucket_width_secs: default_bucket_width(),
            flush_period_secs: default_flush_period(),
            cutoff_age_secs: default_cutoff_age(),
            flush_on_shutdown: true,
        }
    }
}

impl StatisticsSettings {
    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_width_secs)
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_period_secs)
    }

    pub fn cutoff_age(&self) -> Duration {
        Duration::from_secs(self.cutoff_age_secs)
    }
}

/// HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_addr")]
    pub addr: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            addr: default_api_addr(),
        }
    }
}

impl ApiSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| FlagfeedError::Other(format!("Invalid api.addr {:?}: {}", self.addr, e)))
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "flagfeed.db".to_string()
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_bucket_width() -> u64 {
    60
}

fn default_flush_period() -> u64 {
    10
}

fn default_cutoff_age() -> u64 {
    120
}

fn default_api_addr() -> String {
    "127.0.0.1:8700".to_string()
}

impl FlagfeedConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if path.exists() {
                tracing::info!("Loading configuration from {:?}", path);
            } else {
                tracing::info!("Config file not found, using defaults: {:?}", path);
            }
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: FlagfeedConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or spin the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(FlagfeedError::Validation("database.path is empty".into()));
        }
        if self.database.storage_timeout_ms == 0 {
            return Err(FlagfeedError::Validation(
                "database.storage_timeout_ms must be positive".into(),
            ));
        }
        if self.statistics.bucket_width_secs == 0 {
            return Err(FlagfeedError::Validation(
                "statistics.bucket_width_secs must be positive".into(),
            ));
        }
        if self.statistics.flush_period_secs == 0 {
            return Err(FlagfeedError::Validation(
                "statistics.flush_period_secs must be positive".into(),
            ));
        }
        self.api.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clear_env() {
        env::remove_var("FLAGFEED__DATABASE__PATH");
        env::remove_var("FLAGFEED__STATISTICS__FLUSH_PERIOD_SECS");
        env::remove_var("FLAGFEED__STATISTICS__FLUSH_ON_SHUTDOWN");
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();

        let config = FlagfeedConfig::load(None).unwrap();

        assert_eq!(config.database.path, "flagfeed.db");
        assert_eq!(config.database.storage_timeout(), Duration::from_secs(5));
        assert_eq!(config.statistics.bucket_width(), Duration::from_secs(60));
        assert_eq!(config.statistics.flush_period(), Duration::from_secs(10));
        assert_eq!(config.statistics.cutoff_age(), Duration::from_secs(120));
        assert!(config.statistics.flush_on_shutdown);
        assert_eq!(config.api.socket_addr().unwrap().port(), 8700);
    }

    #[test]
    #[serial]
    fn test_file_then_env_override() {
        clear_env();

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/from-file.db"

[statistics]
bucket_width_secs = 300
flush_period_secs = 30
"#
        )
        .unwrap();

        env::set_var("FLAGFEED__STATISTICS__FLUSH_PERIOD_SECS", "5");
        env::set_var("FLAGFEED__STATISTICS__FLUSH_ON_SHUTDOWN", "false");

        let config = FlagfeedConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.database.path, "/tmp/from-file.db");
        assert_eq!(config.statistics.bucket_width_secs, 300);
        assert_eq!(config.statistics.flush_period_secs, 5);
        assert!(!config.statistics.flush_on_shutdown);
        assert_eq!(config.statistics.cutoff_age_secs, 120);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        clear_env();

        let config = FlagfeedConfig::load(Some(Path::new("/nonexistent/flagfeed.toml"))).unwrap();
        assert_eq!(config.statistics.bucket_width_secs, 60);
    }

    #[test]
    fn test_validate_rejects_zero_width() {
        let mut config = FlagfeedConfig::default();
        config.statistics.bucket_width_secs = 0;
        assert!(matches!(config.validate(), Err(FlagfeedError::Validation(_))));

        let mut config = FlagfeedConfig::default();
        config.api.addr = "not-an-addr".into();
        assert!(config.validate().is_err());
    }
}
