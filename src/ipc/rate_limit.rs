//! Sliding-window admission gates.
//!
//! Two instances run in the helper: one keyed by claimed identity for
//! authentication attempts, one keyed by session id for post-auth requests.
//! Excess requests are rejected, never queued.
//!
//! Windows live in a `DashMap`, so checks on different keys only contend
//! when they hash to the same shard.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded: {limit} per {window:?}")]
    Exceeded { limit: u32, window: Duration },
}

/// Configuration for a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions per key within `window`.
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per_second(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(1),
        }
    }
}

/// Keyed sliding-window rate limiter.
pub struct RateLimiter<K> {
    config: RateLimitConfig,
    windows: DashMap<K, VecDeque<Instant>>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit one event for `key`, recording it if allowed.
    pub fn check(&self, key: K) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window);

        let mut window = self.windows.entry(key).or_default();
        if let Some(cutoff) = cutoff {
            while window.front().is_some_and(|&t| t <= cutoff) {
                window.pop_front();
            }
        }

        if window.len() >= self.config.max_requests as usize {
            return Err(RateLimitError::Exceeded {
                limit: self.config.max_requests,
                window: self.config.window,
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Forget all state for `key`.
    pub fn remove(&self, key: &K) {
        self.windows.remove(key);
    }

    /// Drop keys whose windows hold no recent events.
    pub fn prune(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.config.window) else {
            return;
        };
        self.windows.retain(|_, window| {
            while window.front().is_some_and(|&t| t <= cutoff) {
                window.pop_front();
            }
            !window.is_empty()
        });
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
