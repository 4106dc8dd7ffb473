use std::{fmt, time::Duration};

use derive_builder::Builder;
use roster_resilience::RequestError;
use serde::{Deserialize, Serialize};
use tokio::{task::AbortHandle, time::Instant};
use tracing::warn;
use uuid::Uuid;

/// Scheduling priority. Lower sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// One step toward `High`; `High` stays `High`.
    pub fn boosted(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal | Self::High => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `Running -> Pending` is the retry path; terminal states are final.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Pending)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request options for [`crate::RequestQueue::enqueue`].
///
/// `timeout` and `max_retries` fall back to the queue defaults when unset.
#[derive(Builder, Clone, Debug, Default)]
#[builder(public, setter(into))]
pub struct EnqueueOptions {
    pub url: String,
    #[builder(default)]
    pub method: HttpMethod,
    #[builder(default)]
    pub priority: Priority,
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub max_retries: Option<u32>,
    #[builder(default, setter(each(name = "tag", into)))]
    pub tags: Vec<String>,
    #[builder(default, setter(strip_option))]
    pub batch_key: Option<String>,
}

impl EnqueueOptions {
    pub fn builder() -> EnqueueOptionsBuilder {
        EnqueueOptionsBuilder::default()
    }
}

impl From<EnqueueOptionsBuilderError> for RequestError {
    fn from(err: EnqueueOptionsBuilderError) -> Self {
        RequestError::Internal(format!("invalid enqueue options: {err}"))
    }
}

/// Queue key for per-endpoint concurrency: the url without query or fragment.
pub fn endpoint_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        // relative paths
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Bookkeeping for one enqueued request, owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub url: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub priority: Priority,
    pub status: RequestStatus,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub retries: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub tags: Vec<String>,
    pub batch_key: Option<String>,
    /// Start of the current aging period.
    pub boosted_at: Instant,
    /// Set while an attempt is running.
    pub abort: Option<AbortHandle>,
}

impl QueuedRequest {
    pub fn new(options: EnqueueOptions, default_timeout: Duration, default_max_retries: u32) -> Self {
        let now = Instant::now();
        Self {
            id: RequestId::new(),
            endpoint: endpoint_key(&options.url),
            url: options.url,
            method: options.method,
            priority: options.priority,
            status: RequestStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            retries: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            timeout: options.timeout.unwrap_or(default_timeout),
            tags: options.tags,
            batch_key: options.batch_key,
            boosted_at: now,
            abort: None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn transition(&mut self, next: RequestStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(request_id = %self.id, from = ?self.status, to = ?next, "invalid request transition");
            return false;
        }
        self.status = next;
        true
    }

    pub fn set_running(&mut self, abort: AbortHandle) {
        if self.transition(RequestStatus::Running) {
            self.started_at = Some(Instant::now());
            self.abort = Some(abort);
        }
    }

    /// Back to pending for another attempt.
    pub fn set_retry(&mut self) {
        if self.transition(RequestStatus::Pending) {
            self.retries += 1;
            self.abort = None;
            self.boosted_at = Instant::now();
        }
    }

    pub fn set_completed(&mut self) {
        if self.transition(RequestStatus::Completed) {
            self.finish();
        }
    }

    pub fn set_failed(&mut self) {
        if self.transition(RequestStatus::Failed) {
            self.finish();
        }
    }

    /// Abort the running attempt, if any, and mark cancelled.
    pub fn set_cancelled(&mut self) {
        if self.transition(RequestStatus::Cancelled) {
            if let Some(abort) = self.abort.take() {
                abort.abort();
            }
            self.completed_at = Some(Instant::now());
        }
    }

    fn finish(&mut self) {
        self.completed_at = Some(Instant::now());
        self.abort = None;
    }

    pub fn can_retry(&self, error: &RequestError) -> bool {
        error.is_retryable() && self.retries < self.max_retries
    }
}
