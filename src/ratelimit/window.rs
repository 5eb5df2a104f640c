//! Sliding window bookkeeping for a single key.

use std::collections::VecDeque;

use crate::error::{Result, WindowGuardError};

/// Limits applied to every key of a limiter.
///
/// Built through [`RateLimiterConfig::new`], which rejects windows that
/// cannot order timestamps. A `max_events` of zero is accepted and rejects
/// every event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    max_events: u32,
    window_seconds: f64,
}

impl RateLimiterConfig {
    /// Create a validated configuration.
    pub fn new(max_events: u32, window_seconds: f64) -> Result<Self> {
        if !window_seconds.is_finite() || window_seconds <= 0.0 {
            return Err(WindowGuardError::InvalidConfiguration(format!(
                "window_seconds must be a finite number greater than zero, got {}",
                window_seconds
            )));
        }

        Ok(Self {
            max_events,
            window_seconds,
        })
    }

    /// Maximum admitted events per key per window.
    pub fn max_events(&self) -> u32 {
        self.max_events
    }

    /// Rolling window duration in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// The event was recorded; `remaining` more fit in the current window.
    Admitted { remaining: u32 },
    /// The event was not recorded; capacity frees up after `retry_after` seconds.
    ///
    /// The hint is exact only for non-decreasing `now`. After a clock step
    /// backwards it is capped at the window length, even if a future-dated
    /// entry keeps the slot occupied for longer.
    Rejected { retry_after: f64 },
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted { .. })
    }
}

/// Recorded events for one key.
#[derive(Debug, Default)]
pub(crate) struct KeyState {
    /// Event times in arrival order
    timestamps: VecDeque<f64>,
    /// Time of the latest check against this key, admitted or not
    last_seen: f64,
}

impl KeyState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Prune stale events, then record `now` if there is capacity left.
    pub(crate) fn admit(&mut self, config: &RateLimiterConfig, now: f64) -> Verdict {
        self.last_seen = now;
        self.prune(config.window_seconds, now);

        let max_events = config.max_events as usize;
        if self.timestamps.len() >= max_events {
            let retry_after = match self.timestamps.front() {
                Some(&oldest) => config.window_seconds - (now - oldest),
                None => config.window_seconds,
            };
            return Verdict::Rejected {
                retry_after: retry_after.clamp(0.0, config.window_seconds),
            };
        }

        self.timestamps.push_back(now);
        Verdict::Admitted {
            remaining: (max_events - self.timestamps.len()) as u32,
        }
    }

    /// Drop events older than the window, oldest first.
    ///
    /// Stops at the first entry still inside the window, so entries from a
    /// clock that stepped backwards stay until everything ahead of them ages out.
    fn prune(&mut self, window_seconds: f64, now: f64) {
        while let Some(&oldest) = self.timestamps.front() {
            if now - oldest >= window_seconds {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn oldest(&self) -> Option<f64> {
        self.timestamps.front().copied()
    }

    /// Whether the reaper may discard this state at `now`.
    pub(crate) fn is_dormant(&self, window_seconds: f64, retention_seconds: f64, now: f64) -> bool {
        let all_stale = self.timestamps.iter().all(|&t| now - t >= window_seconds);
        all_stale && now - self.last_seen >= retention_seconds
    }
}
