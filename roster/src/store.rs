//! Reactive state containers.
//!
//! Each store keeps its state in a `watch` channel, reads through the cache
//! and the request queue, and reports outcomes to a [`Notifier`]. Loading
//! flags are held by guards so every exit path clears them.
pub mod document;
pub mod employee;
pub mod ui;

use std::{future::Future, sync::Arc, time::Duration};

use roster_cache::CacheStore;
use roster_config::UiSettings;
use roster_queue::{EnqueueOptions, HttpMethod, Priority, RequestQueue};
use roster_resilience::{RequestError, RetryExecutor};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    api::HrApi,
    notify::{Notifier, Severity},
};

pub use document::{DocumentState, DocumentStore};
pub use employee::{EmployeeState, EmployeeStore};
pub use ui::{Notification, UiLoadingGuard, UiState, UiStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    /// A newer debounced call replaced this one.
    #[error("superseded by a newer call")]
    Superseded,
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Short text for the console user.
pub fn user_message(err: &RequestError) -> String {
    match err {
        RequestError::Throttled(_) | RequestError::CircuitOpen(_) | RequestError::Paused => {
            "The service is busy, please try again shortly".to_string()
        }
        RequestError::Timeout(_) | RequestError::Network(_) => {
            "Unable to reach the server".to_string()
        }
        RequestError::Client { status: 404, .. } => "The record no longer exists".to_string(),
        RequestError::Client { message, .. } => message.clone(),
        RequestError::Server { status, .. } => format!("The server failed ({status})"),
        RequestError::Cancelled(reason) => format!("Request cancelled: {reason}"),
        RequestError::Decode(_) | RequestError::Internal(_) => {
            "Unexpected response from the server".to_string()
        }
    }
}

/// Bookkeeping every store state carries.
pub trait StoreState {
    /// Operations in flight; the store is loading while this is non-zero.
    fn in_flight_mut(&mut self) -> &mut usize;
    /// Last user-facing error, cleared by the next success.
    fn error_mut(&mut self) -> &mut Option<String>;
}

/// Marks a store (and the console-wide counter, when wired) as loading until
/// dropped.
pub(crate) struct LoadingGuard<'a, S: StoreState> {
    state: &'a watch::Sender<S>,
    _ui: Option<UiLoadingGuard<'a>>,
}

impl<'a, S: StoreState> LoadingGuard<'a, S> {
    pub(crate) fn begin(state: &'a watch::Sender<S>, ui: Option<&'a UiStore>) -> Self {
        state.send_modify(|s| *s.in_flight_mut() += 1);
        Self {
            state,
            _ui: ui.map(UiStore::begin_loading),
        }
    }
}

impl<S: StoreState> Drop for LoadingGuard<'_, S> {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            let in_flight = s.in_flight_mut();
            *in_flight = in_flight.saturating_sub(1);
        });
    }
}

/// Shared collaborators handed to every store.
#[derive(Clone)]
pub struct StoreContext {
    pub api: Arc<dyn HrApi>,
    pub queue: RequestQueue,
    pub cache: Arc<CacheStore>,
    pub executor: Arc<RetryExecutor>,
    pub notifier: Arc<dyn Notifier>,
    /// Console-wide loading counter.
    pub ui: Option<Arc<UiStore>>,
    pub settings: UiSettings,
    /// `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
}

impl StoreContext {
    fn request_options(
        &self,
        path: &str,
        method: HttpMethod,
        priority: Priority,
        tags: &[&str],
    ) -> Result<EnqueueOptions, RequestError> {
        let mut builder = EnqueueOptions::builder();
        builder
            .url(self.api.url(path))
            .method(method)
            .priority(priority)
            // retries belong to the executor wrapping the queue
            .max_retries(0u32);
        for tag in tags {
            builder.tag(*tag);
        }
        Ok(builder.build()?)
    }

    /// Cached read: the queue runs `op`, the cache and its retry executor
    /// wrap it.
    pub(crate) async fn read<T, F, Fut>(
        &self,
        key: &str,
        path: &str,
        tags: &[&str],
        force_refresh: bool,
        op: F,
    ) -> Result<T, RequestError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let options = self.request_options(path, HttpMethod::Get, Priority::Normal, tags)?;
        let queue = self.queue.clone();
        self.cache
            .get_or_fetch(
                key,
                move || {
                    let queue = queue.clone();
                    let options = options.clone();
                    let op = op.clone();
                    async move { queue.enqueue(options, op).await }
                },
                self.cache_ttl,
                force_refresh,
            )
            .await
    }

    /// Uncached call with breaker and retries around the queue.
    pub(crate) async fn write<T, F, Fut>(
        &self,
        scope: &str,
        path: &str,
        method: HttpMethod,
        tags: &[&str],
        op: F,
    ) -> Result<T, RequestError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let options = self.request_options(path, method, Priority::High, tags)?;
        let queue = self.queue.clone();
        self.executor
            .execute(
                move || {
                    let queue = queue.clone();
                    let options = options.clone();
                    let op = op.clone();
                    async move { queue.enqueue(options, op).await }
                },
                scope,
            )
            .await
    }

    pub(crate) fn loading<'a, S: StoreState>(
        &'a self,
        state: &'a watch::Sender<S>,
    ) -> LoadingGuard<'a, S> {
        LoadingGuard::begin(state, self.ui.as_deref())
    }

    pub(crate) fn notify(&self, message: &str, severity: Severity) {
        self.notifier.notify(message, severity);
    }

    /// Record a failed call on `state` and tell the user.
    pub(crate) fn fail<S: StoreState>(
        &self,
        state: &watch::Sender<S>,
        action: &str,
        err: RequestError,
    ) -> StoreError {
        warn!(error = %err, "{action} failed");
        let message = format!("{action} failed: {}", user_message(&err));
        state.send_modify(|s| *s.error_mut() = Some(message.clone()));
        self.notify(&message, Severity::Error);
        StoreError::Request(err)
    }

    /// Reject input before anything is sent.
    pub(crate) fn reject<S: StoreState>(
        &self,
        state: &watch::Sender<S>,
        message: String,
    ) -> StoreError {
        debug!(reason = %message, "input rejected");
        state.send_modify(|s| *s.error_mut() = Some(message.clone()));
        self.notify(&message, Severity::Warning);
        StoreError::Validation(message)
    }

    pub(crate) fn succeed<S: StoreState>(&self, state: &watch::Sender<S>, message: &str) {
        state.send_if_modified(|s| s.error_mut().take().is_some());
        self.notify(message, Severity::Success);
    }

    /// Drop cached reads under each namespace prefix.
    pub(crate) fn invalidate(&self, prefixes: &[&str]) {
        for prefix in prefixes {
            let removed = self.cache.invalidate_prefix(prefix);
            debug!(prefix, removed, "cache invalidated");
        }
    }

    pub(crate) fn today(&self) -> chrono::NaiveDate {
        chrono::Local::now().date_naive()
    }
}
