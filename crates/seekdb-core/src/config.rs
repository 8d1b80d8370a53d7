//! Configuration for the SeekDB query coordinator.
//!
//! Supports YAML configuration files, environment variable overrides,
//! reasonable defaults, and validation.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure for the coordinator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CoordConfig {
    #[serde(default)]
    pub handoff: HandoffConfig,
}

impl CoordConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by SEEKDB_CONFIG env var
    /// 3. ./config/seekdb.yaml
    /// 4. /etc/seekdb/seekdb.yaml
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("SEEKDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/seekdb").required(false))
            .add_source(File::with_name("/etc/seekdb/seekdb").required(false));

        // Example: SEEKDB_HANDOFF__CHECK_INTERVAL_MS=1000
        builder = builder.add_source(
            Environment::with_prefix("SEEKDB")
                .separator("__")
                .try_parsing(true),
        );

        let config: CoordConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("handoff.auto_handoff", true)?
            .set_default("handoff.check_interval_ms", 3000)?
            .set_default("handoff.clean_retry.max_attempts", 5)?
            .set_default("handoff.clean_retry.initial_backoff_ms", 100)?
            .set_default("handoff.clean_retry.max_backoff_ms", 2000)?
            .set_default("handoff.clean_retry.backoff_multiplier", 2.0)?
            .set_default("handoff.clean_retry.jitter_percent", 0.2)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handoff.check_interval_ms == 0 {
            return Err(ConfigError::Message(
                "handoff.check_interval_ms must be > 0".to_string(),
            ));
        }

        if self.handoff.clean_retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "handoff.clean_retry.max_attempts must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.handoff.clean_retry.jitter_percent) {
            return Err(ConfigError::Message(
                "handoff.clean_retry.jitter_percent must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: CoordConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Segment handoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandoffConfig {
    /// Whether segment handoff is published automatically
    pub auto_handoff: bool,

    /// Scheduling tick interval in milliseconds
    pub check_interval_ms: u64,

    /// Retry policy for persisted-log cleanup
    #[serde(default)]
    pub clean_retry: RetryConfig,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            auto_handoff: true,
            check_interval_ms: 3000,
            clean_retry: RetryConfig::default(),
        }
    }
}

impl HandoffConfig {
    /// Convert the tick interval to a Duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Retry configuration for operations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Fraction of the delay added as random jitter (0.0 disables jitter)
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
            jitter_percent: 0.2,
        }
    }
}

impl RetryConfig {
    /// Get initial backoff duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Get maximum backoff duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Calculate backoff delay for a given retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}
