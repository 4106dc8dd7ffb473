//! One-time wiring of the orchestration layer and the stores.
use std::{fmt, sync::Arc};

use roster_cache::{CacheMirror, CacheOptions, CacheStore, FileMirror};
use roster_config::{QueueSettings, RetrySettings, RosterConfig};
use roster_queue::{PatternRule, QueueError, QueueOptions, RequestQueue, ThrottleRule};
use roster_resilience::{BreakerConfig, CircuitBreakerRegistry, RetryExecutor, RetryPolicy};
use tracing::info;

use crate::{
    api::HrApi,
    notify::Notifier,
    store::{DocumentStore, EmployeeStore, StoreContext, UiStore},
};

/// Shared handles for the whole console.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<RosterConfig>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub executor: Arc<RetryExecutor>,
    pub cache: Arc<CacheStore>,
    pub queue: RequestQueue,
    pub ui: Arc<UiStore>,
    pub employees: Arc<EmployeeStore>,
    pub documents: Arc<DocumentStore>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("base_url", &self.config.api.base_url)
            .field("queue", &self.queue)
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Build everything once. `mirror` overrides `cache.mirror_path`; when
    /// neither is set the cache lives in memory only.
    ///
    /// Spawns the queue dispatcher, so it must run inside a tokio runtime.
    pub fn new(
        config: &RosterConfig,
        api: Arc<dyn HrApi>,
        mirror: Option<Arc<dyn CacheMirror>>,
    ) -> Result<Self, QueueError> {
        let breaker_settings = &config.breaker;
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
            failure_threshold: breaker_settings.failure_threshold,
            global_threshold: breaker_settings
                .failure_threshold
                .saturating_mul(breaker_settings.global_multiplier.max(1)),
            cooldown: breaker_settings.cooldown(),
            error_timeout: breaker_settings.error_timeout(),
        }));
        let executor = Arc::new(RetryExecutor::new(
            breakers.clone(),
            retry_policy(&config.retry),
        ));

        let mirror = mirror.or_else(|| {
            config.cache.mirror_path.as_ref().map(|path| {
                Arc::new(FileMirror::open(path, config.cache.mirror_max_bytes))
                    as Arc<dyn CacheMirror>
            })
        });
        let mut cache = CacheStore::new(
            CacheOptions {
                capacity: config.cache.capacity,
                eviction_ratio: config.cache.eviction_ratio,
                default_ttl: config.cache.default_ttl(),
            },
            executor.clone(),
        );
        if let Some(mirror) = mirror {
            cache = cache.with_mirror(mirror);
        }
        let restored = cache.restore();
        let cache = Arc::new(cache);

        let queue = RequestQueue::spawn(queue_options(&config.queue, &config.retry))?;

        let ui = Arc::new(UiStore::new(config.ui.max_notifications));
        let ctx = StoreContext {
            api,
            queue: queue.clone(),
            cache: cache.clone(),
            executor: executor.clone(),
            notifier: ui.clone() as Arc<dyn Notifier>,
            ui: Some(ui.clone()),
            settings: config.ui.clone(),
            cache_ttl: None,
        };
        let employees = Arc::new(EmployeeStore::new(ctx.clone()));
        let documents = Arc::new(DocumentStore::new(ctx));

        info!(
            base_url = %config.api.base_url,
            restored,
            max_concurrent = config.queue.max_concurrent,
            "services ready"
        );
        Ok(Self {
            config: Arc::new(config.clone()),
            breakers,
            executor,
            cache,
            queue,
            ui,
            employees,
            documents,
        })
    }

    /// Cancel outstanding requests and stop the dispatcher.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        info!("services stopped");
    }
}

pub fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    RetryPolicy {
        max_retries: settings.max_retries,
        base_delay: settings.base_delay(),
        max_delay: settings.max_delay(),
        jitter: settings.jitter,
    }
}

pub fn queue_options(settings: &QueueSettings, retry: &RetrySettings) -> QueueOptions {
    QueueOptions {
        max_concurrent: settings.max_concurrent,
        max_concurrent_per_endpoint: settings.max_concurrent_per_endpoint,
        max_queue_size: settings.max_queue_size,
        default_timeout: settings.default_timeout(),
        retry: RetryPolicy {
            max_retries: settings.default_max_retries,
            base_delay: settings.retry_base_delay(),
            ..retry_policy(retry)
        },
        batching: settings.batching,
        batch_window: settings.batch_window(),
        boost_interval: settings.boost_interval(),
        aging_tick: settings.aging_tick(),
        throttle: ThrottleRule {
            max_requests: settings.throttle.max_requests,
            window: settings.throttle.window(),
        },
        pattern_throttles: settings
            .throttle
            .patterns
            .iter()
            .map(|p| PatternRule {
                pattern: p.pattern.clone(),
                max_requests: p.max_requests,
                window: p.window(),
            })
            .collect(),
        ..QueueOptions::default()
    }
}
