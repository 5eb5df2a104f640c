//! Rate limiting logic and state management.

mod backend;
mod clock;
mod limiter;
mod reaper;
mod window;

pub use backend::{Decision, FailurePolicy, GuardedLimiter, RateLimitBackend};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use limiter::{SlidingWindowRateLimiter, Snapshot};
pub use reaper::{spawn_reaper, ReaperSettings};
pub use window::{RateLimiterConfig, Verdict};
