//! # roster
//!
//! Client-side core of an HR administration console: employee records,
//! identity and visa documents, search and dashboard figures, kept in sync
//! with a remote HTTP API.
//!
//! Outbound calls pass through a small orchestration layer:
//!
//! - **Request queue** ([`queue`]): priorities, per-endpoint concurrency,
//!   throttling, batching and cancellation by tag.
//! - **Retry executor and circuit breakers** ([`resilience`]): exponential
//!   backoff with jitter, per-endpoint and global breakers.
//! - **Cache** ([`cache`]): TTL plus LRU eviction, an optional durable
//!   mirror, and stale values served when a refresh fails.
//!
//! The [`store`] module holds the state containers the console renders from.
//! [`Services`] builds all of it once:
//!
//! ```ignore
//! let config = roster::config::RosterConfig::from_file("roster.toml")?;
//! let api = Arc::new(roster::api::HttpApi::new(&config.api)?);
//! let services = roster::Services::new(&config, api, None)?;
//! services.employees.load(1).await?;
//! ```
pub mod api;
pub mod debounce;
pub mod model;
pub mod notify;
pub mod pagination;
pub mod services;
pub mod store;
pub mod telemetry;

pub use api::{HrApi, Paged};
#[cfg(feature = "http")]
pub use api::HttpApi;
pub use notify::{Notifier, Severity, TracingNotifier};
pub use services::Services;
pub use store::{StoreContext, StoreError};

pub use roster_cache as cache;
pub use roster_config as config;
pub use roster_queue as queue;
pub use roster_resilience as resilience;
// re-export
pub use async_trait;
pub use chrono;
#[cfg(feature = "http")]
pub use reqwest;
pub use serde;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;
