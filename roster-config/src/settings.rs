//! Typed console settings.
//!
//! Every section is optional in the TOML file; missing keys fall back to the
//! defaults below. Durations are stored as integer milliseconds and exposed
//! as [`Duration`] through accessor methods.
//!
//! ```toml
//! [api]
//! base_url = "https://hr.example.com/api"
//!
//! [queue]
//! max_concurrent = 6
//!
//! [[queue.throttle.patterns]]
//! pattern = "*/documents/upload*"
//! max_requests = 2
//! window_ms = 1000
//! ```
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Configurable};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub api: ApiSettings,
    pub queue: QueueSettings,
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub ui: UiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
    pub auth_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            user_agent: concat!("roster/", env!("CARGO_PKG_VERSION")).to_string(),
            auth_token: None,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub max_concurrent_per_endpoint: usize,
    pub max_queue_size: usize,
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub batching: bool,
    pub batch_window_ms: u64,
    pub boost_interval_ms: u64,
    pub aging_tick_ms: u64,
    pub throttle: ThrottleSettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_concurrent_per_endpoint: 4,
            max_queue_size: 100,
            default_timeout_ms: 30_000,
            default_max_retries: 3,
            retry_base_delay_ms: 1_000,
            batching: true,
            batch_window_ms: 50,
            boost_interval_ms: 10_000,
            aging_tick_ms: 1_000,
            throttle: ThrottleSettings::default(),
        }
    }
}

impl QueueSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn boost_interval(&self) -> Duration {
        Duration::from_millis(self.boost_interval_ms)
    }

    pub fn aging_tick(&self) -> Duration {
        Duration::from_millis(self.aging_tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub max_requests: usize,
    pub window_ms: u64,
    pub patterns: Vec<PatternThrottleSettings>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_ms: 1_000,
            patterns: Vec::new(),
        }
    }
}

impl ThrottleSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Extra admission limit for URLs matching a glob-style `pattern`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternThrottleSettings {
    pub pattern: String,
    pub max_requests: usize,
    pub window_ms: u64,
}

impl PatternThrottleSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub eviction_ratio: f64,
    pub default_ttl_ms: u64,
    pub mirror_path: Option<PathBuf>,
    pub mirror_max_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 500,
            eviction_ratio: 0.2,
            default_ttl_ms: 5 * 60 * 1_000,
            mirror_path: None,
            mirror_max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub global_multiplier: u32,
    pub cooldown_ms: u64,
    pub error_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            global_multiplier: 2,
            cooldown_ms: 30_000,
            error_timeout_ms: 60_000,
        }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn error_timeout(&self) -> Duration {
        Duration::from_millis(self.error_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.15,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub debounce_ms: u64,
    pub max_notifications: usize,
    pub page_size: usize,
    pub expiry_warning_days: i64,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            max_notifications: 50,
            page_size: 20,
            expiry_warning_days: 30,
        }
    }
}

impl UiSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RosterConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values that would stall the console (zero limits, empty urls).
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                key: key.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url", "must not be empty"));
        }
        if self.queue.max_concurrent == 0 {
            return Err(invalid("queue.max_concurrent", "must be at least 1"));
        }
        if self.queue.max_concurrent_per_endpoint == 0 {
            return Err(invalid(
                "queue.max_concurrent_per_endpoint",
                "must be at least 1",
            ));
        }
        if self.queue.max_queue_size == 0 {
            return Err(invalid("queue.max_queue_size", "must be at least 1"));
        }
        if self.queue.throttle.max_requests == 0 {
            return Err(invalid("queue.throttle.max_requests", "must be at least 1"));
        }
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.cache.eviction_ratio) {
            return Err(invalid("cache.eviction_ratio", "must be within [0, 1]"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(invalid("retry.jitter", "must be within [0, 1)"));
        }
        if self.ui.page_size == 0 {
            return Err(invalid("ui.page_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Keeps the raw table around for dot-notation lookups of keys the typed
/// settings do not model.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    raw: toml::Value,
    pub settings: RosterConfig,
}

impl Configurable for ConsoleConfig {
    fn config(&self) -> &toml::Value {
        &self.raw
    }
}

impl ConsoleConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let raw = Self::load_config(path)?;
        let settings: RosterConfig = raw.clone().try_into()?;
        settings.validate()?;
        Ok(Self { raw, settings })
    }
}
