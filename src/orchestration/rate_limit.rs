use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info};
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Fixed-window counter for a single operation name.
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub count: u32,
    pub window_reset_at: Instant,
}

/// Per-operation fixed-window rate limiter.
///
/// Limits can be swapped at runtime; windows already open keep counting
/// against the new maximum and pick up the new duration on their next reset.
pub struct RateLimiter {
    config: ArcSwap<RateLimitConfig>,
    windows: DashMap<String, RateWindow>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            windows: DashMap::new(),
        }
    }

    /// Admit or refuse one call to `operation`.
    pub fn try_admit(&self, operation: &str) -> bool {
        let (max, window) = self.config.load().limit_for(operation);
        let now = Instant::now();

        match self.windows.entry(operation.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(RateWindow {
                    count: 1,
                    window_reset_at: now + window,
                });
                true
            }
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if now > state.window_reset_at {
                    state.count = 1;
                    state.window_reset_at = now + window;
                    true
                } else if state.count < max {
                    state.count += 1;
                    true
                } else {
                    debug!("Rate limit of {max} reached for {operation}");
                    false
                }
            }
        }
    }

    /// Admissions left in the current window.
    pub fn remaining(&self, operation: &str) -> u32 {
        let (max, _) = self.config.load().limit_for(operation);
        match self.windows.get(operation) {
            Some(state) if Instant::now() <= state.window_reset_at => {
                max.saturating_sub(state.count)
            }
            _ => max,
        }
    }

    /// Forget the window for `operation`.
    pub fn reset(&self, operation: &str) {
        self.windows.remove(operation);
    }

    pub fn update_config(&self, config: RateLimitConfig) {
        info!(
            "Updating rate limits: {} per {}ms, {} overrides",
            config.max_requests,
            config.window_ms,
            config.overrides.len()
        );
        self.config.store(Arc::new(config));
    }

    /// Number of operations with a tracked window.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::*;
    use crate::config::RateWindowConfig;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_ms,
            overrides: HashMap::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary() {
        let limiter = limiter(5, 1000);

        for _ in 0..5 {
            assert!(limiter.try_admit("op"));
        }
        assert!(!limiter.try_admit("op"));
        assert_eq!(limiter.remaining("op"), 0);

        // Still inside the window at exactly the reset instant.
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!limiter.try_admit("op"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.try_admit("op"));
        assert_eq!(limiter.remaining("op"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_are_independent() {
        let limiter = limiter(1, 1000);
        assert!(limiter.try_admit("getUsers"));
        assert!(!limiter.try_admit("getUsers"));
        assert!(limiter.try_admit("getEvents"));
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_limit() {
        let limiter = RateLimiter::default();
        for _ in 0..100 {
            assert!(limiter.try_admit("op"));
        }
        assert!(!limiter.try_admit("op"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_admit("op"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_and_update() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "export".to_string(),
            RateWindowConfig {
                max_requests: 1,
                window_ms: 1000,
            },
        );
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 10,
            window_ms: 1000,
            overrides,
        });

        assert!(limiter.try_admit("export"));
        assert!(!limiter.try_admit("export"));
        assert_eq!(limiter.remaining("other"), 10);

        limiter.update_config(RateLimitConfig {
            max_requests: 10,
            window_ms: 1000,
            overrides: HashMap::new(),
        });
        assert!(limiter.try_admit("export"));

        limiter.reset("export");
        assert_eq!(limiter.remaining("export"), 10);
    }
}
