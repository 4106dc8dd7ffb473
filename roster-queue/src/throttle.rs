//! Sliding-window admission limits, global and per url pattern.
use std::{collections::VecDeque, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::QueueError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRule {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for ThrottleRule {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_millis(1000),
        }
    }
}

/// Limit applied to urls matching a glob where `*` matches any run of
/// characters, e.g. `*/api/documents/upload*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub max_requests: usize,
    pub window: Duration,
}

#[derive(Debug)]
pub struct SlidingWindow {
    rule: ThrottleRule,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(rule: ThrottleRule) -> Self {
        Self {
            rule,
            admitted: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.admitted.front() {
            if now.duration_since(*front) >= self.rule.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.admitted.len() < self.rule.max_requests
    }

    pub fn record(&mut self, now: Instant) {
        self.admitted.push_back(now);
    }

    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.admitted.len()
    }
}

pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

#[derive(Debug)]
struct PatternWindow {
    pattern: String,
    regex: Regex,
    window: SlidingWindow,
}

#[derive(Debug)]
pub struct Throttle {
    global: SlidingWindow,
    patterns: Vec<PatternWindow>,
}

impl Throttle {
    pub fn new(global: ThrottleRule, patterns: &[PatternRule]) -> Result<Self, QueueError> {
        let patterns = patterns
            .iter()
            .map(|rule| {
                let regex = glob_to_regex(&rule.pattern).map_err(|source| {
                    QueueError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    }
                })?;
                Ok(PatternWindow {
                    pattern: rule.pattern.clone(),
                    regex,
                    window: SlidingWindow::new(ThrottleRule {
                        max_requests: rule.max_requests,
                        window: rule.window,
                    }),
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        Ok(Self {
            global: SlidingWindow::new(global),
            patterns,
        })
    }

    /// Admit `url` if the global window and every matching pattern window
    /// have room. Nothing is recorded on rejection; the error names the
    /// limit that refused it.
    pub fn try_admit(&mut self, url: &str, now: Instant) -> Result<(), String> {
        if !self.global.has_capacity(now) {
            return Err("global rate limit".to_string());
        }
        for pattern in self.patterns.iter_mut() {
            if pattern.regex.is_match(url) && !pattern.window.has_capacity(now) {
                return Err(format!("rate limit for `{}`", pattern.pattern));
            }
        }

        self.global.record(now);
        for pattern in self.patterns.iter_mut() {
            if pattern.regex.is_match(url) {
                pattern.window.record(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        let re = glob_to_regex("*/api/documents/upload*").unwrap();
        assert!(re.is_match("https://hr.example.com/api/documents/upload"));
        assert!(re.is_match("/api/documents/upload?employee=7"));
        assert!(!re.is_match("/api/documents"));

        // regex metacharacters in the pattern are literal
        let re = glob_to_regex("/api/search?q=*").unwrap();
        assert!(re.is_match("/api/search?q=ada"));
        assert!(!re.is_match("/api/searchXq=ada"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_window_slides() {
        let mut throttle = Throttle::new(
            ThrottleRule {
                max_requests: 2,
                window: Duration::from_millis(1000),
            },
            &[],
        )
        .unwrap();

        let start = Instant::now();
        assert!(throttle.try_admit("/a", start).is_ok());
        assert!(throttle.try_admit("/b", start).is_ok());
        assert!(throttle.try_admit("/c", start).is_err());
        assert!(
            throttle
                .try_admit("/c", start + Duration::from_millis(999))
                .is_err()
        );
        assert!(
            throttle
                .try_admit("/c", start + Duration::from_millis(1000))
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_window_only_counts_matches() {
        let mut throttle = Throttle::new(
            ThrottleRule::default(),
            &[PatternRule {
                pattern: "*/upload*".to_string(),
                max_requests: 1,
                window: Duration::from_secs(5),
            }],
        )
        .unwrap();

        let now = Instant::now();
        assert!(throttle.try_admit("/api/upload", now).is_ok());
        let err = throttle.try_admit("/api/upload?x=1", now).unwrap_err();
        assert!(err.contains("*/upload*"));
        // unrelated urls only see the global window
        assert!(throttle.try_admit("/api/employees", now).is_ok());
        // the rejection above did not consume global capacity
        assert_eq!(throttle.global.in_window(now), 2);
    }
}
