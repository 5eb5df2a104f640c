//! Rate limit backend trait and failure policy handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::limiter::{SlidingWindowRateLimiter, Snapshot};
use super::window::{RateLimiterConfig, Verdict};
use crate::error::{Result, WindowGuardError};

/// Trait for rate limit state stores.
///
/// The in-process [`SlidingWindowRateLimiter`] is the only store shipped here;
/// the trait exists so an external store can sit behind the same dispatcher.
/// Store failures must be reported as [`WindowGuardError::BackendUnavailable`].
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Check and record an event for `key` at `now`.
    async fn check(&self, key: &str, now: f64) -> Result<Verdict>;

    /// Clear the state recorded for `key`.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Read the state recorded for `key`.
    async fn snapshot(&self, key: &str) -> Result<Snapshot>;

    /// Limits enforced by this backend.
    fn limits(&self) -> RateLimiterConfig;
}

#[async_trait]
impl RateLimitBackend for SlidingWindowRateLimiter {
    async fn check(&self, key: &str, now: f64) -> Result<Verdict> {
        SlidingWindowRateLimiter::check(self, key, now)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        SlidingWindowRateLimiter::reset(self, key)
    }

    async fn snapshot(&self, key: &str) -> Result<Snapshot> {
        SlidingWindowRateLimiter::snapshot(self, key)
    }

    fn limits(&self) -> RateLimiterConfig {
        *self.config()
    }
}

/// What to do when the backend cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the request as rejected; keeps the rate limit guarantee.
    #[default]
    FailClosed,
    /// Let the request through; keeps the service available.
    FailOpen,
}

/// Outcome of a guarded check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The backend answered.
    Verdict(Verdict),
    /// The backend failed and the fail-open policy let the request through.
    Bypassed { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        match self {
            Decision::Verdict(verdict) => verdict.is_admitted(),
            Decision::Bypassed { .. } => true,
        }
    }
}

/// Wraps a backend with a call timeout and a [`FailurePolicy`].
pub struct GuardedLimiter {
    backend: Arc<dyn RateLimitBackend>,
    timeout: Duration,
    policy: FailurePolicy,
}

impl GuardedLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>, timeout: Duration, policy: FailurePolicy) -> Self {
        Self {
            backend,
            timeout,
            policy,
        }
    }

    /// Check `key` at `now`, applying the failure policy to backend errors.
    ///
    /// Caller errors such as an empty key are returned as-is regardless of policy.
    /// Under [`FailurePolicy::FailClosed`] backend failures come back as
    /// [`WindowGuardError::BackendUnavailable`].
    pub async fn check(&self, key: &str, now: f64) -> Result<Decision> {
        let outcome = match tokio::time::timeout(self.timeout, self.backend.check(key, now)).await {
            Ok(result) => result,
            Err(_) => Err(WindowGuardError::BackendUnavailable(format!(
                "check timed out after {:?}",
                self.timeout
            ))),
        };

        match outcome {
            Ok(verdict) => Ok(Decision::Verdict(verdict)),
            Err(WindowGuardError::BackendUnavailable(reason)) => match self.policy {
                FailurePolicy::FailOpen => {
                    warn!(key = %key, reason = %reason, "Rate limit backend unavailable, failing open");
                    Ok(Decision::Bypassed { reason })
                }
                FailurePolicy::FailClosed => {
                    warn!(key = %key, reason = %reason, "Rate limit backend unavailable, failing closed");
                    Err(WindowGuardError::BackendUnavailable(reason))
                }
            },
            Err(e) => Err(e),
        }
    }

    pub async fn reset(&self, key: &str) -> Result<()> {
        self.backend.reset(key).await
    }

    pub async fn snapshot(&self, key: &str) -> Result<Snapshot> {
        self.backend.snapshot(key).await
    }

    pub fn limits(&self) -> RateLimiterConfig {
        self.backend.limits()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }
}
