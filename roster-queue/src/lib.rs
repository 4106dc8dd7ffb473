//! Request queue for outbound API calls.
//!
//! Admission control (pause, sliding-window throttles, capacity), priority
//! scheduling with aging, global and per-endpoint concurrency ceilings,
//! per-attempt timeouts, queued retries, batching windows and tag-based
//! cancellation, all owned by a single dispatcher task.
pub mod manager;
pub mod request;
pub mod stats;
pub mod throttle;

pub use crate::manager::{QueueOptions, QueueOptionsBuilder, QueueOptionsBuilderError, RequestQueue};
pub use crate::request::{
    EnqueueOptions, EnqueueOptionsBuilder, EnqueueOptionsBuilderError, HttpMethod, Priority,
    QueuedRequest, RequestId, RequestStatus, endpoint_key,
};
pub use crate::stats::QueueStats;
pub use crate::throttle::{PatternRule, ThrottleRule};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid throttle pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid queue options: {0}")]
    Invalid(String),
}
