use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{ErrorKind, OrchestratorResult};

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    #[serde(default)]
    pub cache: CacheConfig,
    #[validate(nested)]
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[validate(nested)]
    #[serde(default)]
    pub retry: RetryConfig,
    #[validate(nested)]
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub inflight: InflightConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> OrchestratorResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> OrchestratorResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> OrchestratorResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_ttl_ms")]
    #[validate(range(min = 1))]
    pub default_ttl_ms: u64,
    /// Refuse cache writes that raced an invalidation.
    #[serde(default)]
    pub versioned_writes: bool,
}

impl CacheConfig {
    fn default_ttl_ms() -> u64 {
        30_000
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: Self::default_ttl_ms(),
            versioned_writes: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct RateWindowConfig {
    #[validate(range(min = 1))]
    pub max_requests: u32,
    #[validate(range(min = 1))]
    pub window_ms: u64,
}

impl RateWindowConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "RateLimitConfig::validate_overrides"))]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_max_requests")]
    #[validate(range(min = 1))]
    pub max_requests: u32,
    #[serde(default = "RateLimitConfig::default_window_ms")]
    #[validate(range(min = 1))]
    pub window_ms: u64,
    /// Per-operation limits that replace the defaults above.
    #[serde(default)]
    pub overrides: HashMap<String, RateWindowConfig>,
}

impl RateLimitConfig {
    fn default_max_requests() -> u32 {
        100
    }

    fn default_window_ms() -> u64 {
        60_000
    }

    fn validate_overrides(&self) -> Result<(), ValidationError> {
        for (name, window) in &self.overrides {
            if name.is_empty() {
                return Err(ValidationError::new("override_name_required"));
            }
            if window.validate().is_err() {
                return Err(ValidationError::new("invalid_override_window"));
            }
        }
        Ok(())
    }

    /// Effective limit for an operation.
    pub fn limit_for(&self, operation: &str) -> (u32, Duration) {
        match self.overrides.get(operation) {
            Some(w) => (w.max_requests, w.window()),
            None => (self.max_requests, Duration::from_millis(self.window_ms)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: Self::default_max_requests(),
            window_ms: Self::default_window_ms(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "RetryConfig::validate_max_delay"))]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,
    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetryConfig::default_use_backoff")]
    pub use_backoff: bool,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter: bool,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        3
    }

    fn default_base_delay_ms() -> u64 {
        1000
    }

    fn default_use_backoff() -> bool {
        true
    }

    fn validate_max_delay(&self) -> Result<(), ValidationError> {
        match self.max_delay_ms {
            Some(max) if max < self.base_delay_ms => {
                Err(ValidationError::new("max_delay_below_base_delay"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_delay_ms: Self::default_base_delay_ms(),
            use_backoff: Self::default_use_backoff(),
            max_delay_ms: None,
            jitter: false,
        }
    }
}

/// What a batch does with an item that did not produce a genuine value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Leave the key out of the result map.
    #[default]
    Omit,
    /// Insert the item's fallback under its key.
    Fallback,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct BatchConfig {
    #[serde(default = "BatchConfig::default_concurrency")]
    #[validate(range(min = 1))]
    pub concurrency: usize,
    #[serde(default)]
    pub on_failure: BatchFailurePolicy,
}

impl BatchConfig {
    fn default_concurrency() -> usize {
        3
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            on_failure: BatchFailurePolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InflightConfig {
    /// Deduplicate key-less calls on their operation name.
    #[serde(default)]
    pub dedupe_without_key: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Extra backend codes, checked before the built-in table.
    #[serde(default)]
    pub codes: HashMap<String, ErrorKind>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub timestamps: bool,
}

impl LogConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            timestamps: false,
        }
    }
}
