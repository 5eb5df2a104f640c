//! Core sliding-window rate limiter.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::window::{KeyState, RateLimiterConfig, Verdict};
use crate::error::{Result, WindowGuardError};

/// Recorded state of a key as of its last check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    /// Number of recorded events
    pub count: usize,
    /// Oldest recorded event time, if any
    pub oldest: Option<f64>,
}

/// Sliding-window rate limiter keyed by client identifier.
///
/// Every key gets its own lock, so concurrent checks for different keys
/// never wait on each other, while checks for the same key are serialized
/// through prune, capacity test and append. Time is always supplied by the
/// caller.
pub struct SlidingWindowRateLimiter {
    config: RateLimiterConfig,
    /// Per-key states indexed by client key
    registry: DashMap<String, Arc<Mutex<KeyState>>>,
}

impl SlidingWindowRateLimiter {
    /// Create a new rate limiter with an empty registry.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            registry: DashMap::new(),
        }
    }

    /// Check whether an event for `key` at `now` is admitted, recording it if so.
    pub fn check(&self, key: &str, now: f64) -> Result<Verdict> {
        validate_key(key)?;
        if !now.is_finite() {
            return Err(WindowGuardError::InvalidTimestamp(now));
        }

        trace!(key = %key, now = now, "Checking rate limit");

        // Clone the key's handle so the shard guard is released before locking it
        let state = match self.registry.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let entry = self.registry.entry(key.to_string()).or_insert_with(|| {
                    debug!(
                        key = %key,
                        max_events = self.config.max_events(),
                        window_seconds = self.config.window_seconds(),
                        "Creating new rate limit window"
                    );
                    Arc::new(Mutex::new(KeyState::new()))
                });
                Arc::clone(entry.value())
            }
        };

        let verdict = state.lock().admit(&self.config, now);

        if let Verdict::Rejected { retry_after } = verdict {
            debug!(key = %key, retry_after = retry_after, "Rate limit exceeded");
        }

        Ok(verdict)
    }

    /// Forget everything recorded for `key`. A no-op for unknown keys.
    pub fn reset(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        if self.registry.remove(key).is_some() {
            debug!(key = %key, "Rate limit window reset");
        }
        Ok(())
    }

    /// Report the events recorded for `key` without pruning or mutating them.
    ///
    /// The count reflects the key as of its last `check`; entries that have
    /// aged out since then are still included.
    pub fn snapshot(&self, key: &str) -> Result<Snapshot> {
        validate_key(key)?;

        let state = match self.registry.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                return Ok(Snapshot {
                    count: 0,
                    oldest: None,
                })
            }
        };

        let state = state.lock();
        Ok(Snapshot {
            count: state.count(),
            oldest: state.oldest(),
        })
    }

    /// Remove keys with no event inside the window and no check within
    /// `retention_seconds` of `now`. Returns how many keys were removed.
    ///
    /// Keys currently held by an in-flight check are left alone.
    pub fn reap(&self, now: f64, retention_seconds: f64) -> usize {
        let window_seconds = self.config.window_seconds();
        let before = self.registry.len();

        let mut removed = 0;
        let keys: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let reaped = self.registry.remove_if(&key, |_, state| {
                // Only the registry holds the handle, nobody can be mid-check
                Arc::strong_count(state) == 1
                    && state
                        .try_lock()
                        .map(|s| s.is_dormant(window_seconds, retention_seconds, now))
                        .unwrap_or(false)
            });
            if reaped.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed = removed, before = before, "Reaped dormant rate limit keys");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.registry.len()
    }

    /// The limits this limiter enforces.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(WindowGuardError::InvalidKey);
    }
    Ok(())
}
