pub mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod settings;

pub use config::{ConfigError, Configurable};
pub use settings::{
    ApiSettings, BreakerSettings, CacheSettings, ConsoleConfig,
    PatternThrottleSettings, QueueSettings, RetrySettings, RosterConfig,
    ThrottleSettings, UiSettings,
};
