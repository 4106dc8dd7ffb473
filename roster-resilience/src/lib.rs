//! Failure handling shared by the console's request layer.
//!
//! - [`RequestError`]: the error taxonomy every outbound call resolves to.
//! - [`CircuitBreakerRegistry`]: global and per-endpoint breakers.
//! - [`RetryExecutor`]: bounded retries with exponential backoff and jitter.
pub mod breaker;
pub mod error;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreakerRegistry, Scope};
pub use error::{CancelReason, RequestError};
pub use retry::{RetryExecutor, RetryPolicy, backoff_delay};
