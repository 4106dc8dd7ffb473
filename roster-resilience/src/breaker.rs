//! Failure counters that stop calls to a struggling backend.
//!
//! One breaker guards the whole API and one exists per endpoint scope.
//! Openness is derived from time: a breaker reports open only while
//! `now < open_until` and closes itself on the first query after the
//! cool-down, so no timer task is needed.
//!
//! ```text
//! CLOSED --(threshold failures inside error window)--> OPEN
//! OPEN   --(cool-down elapsed, checked on is_open)---> CLOSED
//! any    --(record_success)-------------------------> endpoint CLOSED
//! ```
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Which breaker a query refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Endpoint(String),
}

impl Scope {
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self::Endpoint(name.into())
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures inside the error window that open an endpoint breaker.
    pub failure_threshold: u32,
    /// Failures that open the global breaker.
    pub global_threshold: u32,
    /// How long an open breaker rejects calls.
    pub cooldown: Duration,
    /// A failure later than this after the previous one starts a new count.
    pub error_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            global_threshold: 10,
            cooldown: Duration::from_secs(30),
            error_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            global_threshold: failure_threshold.saturating_mul(2),
            cooldown,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
    open: bool,
}

impl BreakerState {
    /// Lazily close an expired breaker; returns whether it is still open.
    fn refresh(&mut self, now: Instant) -> bool {
        if !self.open {
            return false;
        }
        match self.open_until {
            Some(until) if now < until => true,
            _ => {
                self.reset();
                false
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns true when this failure tripped the breaker.
    fn record_failure(
        &mut self,
        now: Instant,
        threshold: u32,
        config: &BreakerConfig,
    ) -> bool {
        let already_open = self.refresh(now);
        if let Some(last) = self.last_failure {
            if now.saturating_duration_since(last) > config.error_timeout {
                self.failures = 0;
            }
        }
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        if !already_open && self.failures >= threshold {
            self.open = true;
            self.open_until = Some(now + config.cooldown);
            return true;
        }
        false
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub failures: u32,
    pub open: bool,
    pub remaining_cooldown: Option<Duration>,
}

#[derive(Debug, Default)]
struct Breakers {
    global: BreakerState,
    endpoints: HashMap<String, BreakerState>,
}

/// Global plus per-endpoint circuit breakers behind one lock.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    inner: Mutex<Breakers>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Breakers::default()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Breakers> {
        // state is plain counters; a panic mid-update cannot leave it unusable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self, scope: &Scope) -> bool {
        let now = Instant::now();
        let mut breakers = self.lock();
        match scope {
            Scope::Global => breakers.global.refresh(now),
            Scope::Endpoint(name) => match breakers.endpoints.get_mut(name) {
                Some(state) => {
                    let was_open = state.open;
                    let open = state.refresh(now);
                    if was_open && !open {
                        info!(scope = %name, "circuit closed after cool-down");
                    }
                    open
                }
                None => false,
            },
        }
    }

    /// Count a backend failure against `endpoint` and the global breaker.
    pub fn record_failure(&self, endpoint: &str) {
        let now = Instant::now();
        let config = &self.config;
        let mut breakers = self.lock();

        let state = breakers.endpoints.entry(endpoint.to_string()).or_default();
        if state.record_failure(now, config.failure_threshold, config) {
            warn!(
                scope = %endpoint,
                failures = state.failures,
                cooldown = ?config.cooldown,
                "circuit opened"
            );
        } else {
            debug!(scope = %endpoint, failures = state.failures, "failure recorded");
        }

        if breakers
            .global
            .record_failure(now, config.global_threshold, config)
        {
            warn!(
                failures = breakers.global.failures,
                cooldown = ?config.cooldown,
                "global circuit opened"
            );
        }
    }

    /// Close the endpoint breaker and let the global count drain by one.
    pub fn record_success(&self, endpoint: &str) {
        let mut breakers = self.lock();
        if let Some(state) = breakers.endpoints.get_mut(endpoint) {
            if state.open {
                info!(scope = %endpoint, "circuit closed after success");
            }
            state.reset();
        }

        let global = &mut breakers.global;
        global.failures = global.failures.saturating_sub(1);
        if global.failures == 0 {
            global.reset();
        }
    }

    pub fn reset(&self, scope: &Scope) {
        let mut breakers = self.lock();
        match scope {
            Scope::Global => breakers.global.reset(),
            Scope::Endpoint(name) => {
                breakers.endpoints.remove(name);
            }
        }
    }

    pub fn reset_all(&self) {
        let mut breakers = self.lock();
        breakers.global.reset();
        breakers.endpoints.clear();
    }

    pub fn snapshot(&self, scope: &Scope) -> BreakerSnapshot {
        let now = Instant::now();
        let mut breakers = self.lock();
        let state = match scope {
            Scope::Global => Some(&mut breakers.global),
            Scope::Endpoint(name) => breakers.endpoints.get_mut(name),
        };
        match state {
            Some(state) => {
                let open = state.refresh(now);
                BreakerSnapshot {
                    failures: state.failures,
                    open,
                    remaining_cooldown: state
                        .open_until
                        .filter(|_| open)
                        .map(|until| until.saturating_duration_since(now)),
                }
            }
            None => BreakerSnapshot {
                failures: 0,
                open: false,
                remaining_cooldown: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerConfig {
            failure_threshold: 5,
            global_threshold: 10,
            cooldown: Duration::from_secs(30),
            error_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breakers = registry();
        let scope = Scope::endpoint("employees");

        for _ in 0..4 {
            breakers.record_failure("employees");
        }
        assert!(!breakers.is_open(&scope));

        breakers.record_failure("employees");
        assert!(breakers.is_open(&scope));
        assert!(!breakers.is_open(&Scope::Global));
        assert!(!breakers.is_open(&Scope::endpoint("documents")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_closes_and_resets() {
        let breakers = registry();
        let scope = Scope::endpoint("employees");
        for _ in 0..5 {
            breakers.record_failure("employees");
        }
        assert!(breakers.is_open(&scope));

        breakers.record_success("employees");
        assert!(!breakers.is_open(&scope));
        assert_eq!(breakers.snapshot(&scope).failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_lazily_after_cooldown() {
        let breakers = registry();
        let scope = Scope::endpoint("employees");
        for _ in 0..5 {
            breakers.record_failure("employees");
        }
        let snapshot = breakers.snapshot(&scope);
        assert!(snapshot.open);
        assert_eq!(snapshot.remaining_cooldown, Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(breakers.is_open(&scope));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!breakers.is_open(&scope));
        assert_eq!(breakers.snapshot(&scope).failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_restart_count() {
        let breakers = registry();
        let scope = Scope::endpoint("employees");
        for _ in 0..4 {
            breakers.record_failure("employees");
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        breakers.record_failure("employees");

        assert!(!breakers.is_open(&scope));
        assert_eq!(breakers.snapshot(&scope).failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_opens_at_double_threshold_and_drains() {
        let breakers = registry();
        for _ in 0..5 {
            breakers.record_failure("employees");
        }
        for _ in 0..5 {
            breakers.record_failure("documents");
        }
        assert!(breakers.is_open(&Scope::Global));

        // one success only decrements the global count
        breakers.record_success("employees");
        assert!(breakers.is_open(&Scope::Global));
        assert_eq!(breakers.snapshot(&Scope::Global).failures, 9);

        for _ in 0..9 {
            breakers.record_success("documents");
        }
        assert!(!breakers.is_open(&Scope::Global));
        assert_eq!(breakers.snapshot(&Scope::Global).failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_scope() {
        let breakers = registry();
        for _ in 0..5 {
            breakers.record_failure("employees");
        }
        breakers.reset(&Scope::endpoint("employees"));
        assert!(!breakers.is_open(&Scope::endpoint("employees")));

        breakers.reset_all();
        assert_eq!(breakers.snapshot(&Scope::Global).failures, 0);
    }

    #[test]
    fn test_config_new_doubles_global_threshold() {
        let config = BreakerConfig::new(3, Duration::from_secs(5));
        assert_eq!(config.global_threshold, 6);
        assert_eq!(config.error_timeout, Duration::from_secs(60));
    }
}
