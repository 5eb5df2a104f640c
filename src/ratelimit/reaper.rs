//! Background removal of dormant keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::limiter::SlidingWindowRateLimiter;

/// Settings for the background reaper.
#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    /// How often to sweep the registry
    pub interval: Duration,
    /// How long a key must go without checks before it can be removed
    pub retention_seconds: f64,
}

/// Spawn a task that periodically reaps dormant keys from `limiter`.
///
/// The task exits once `shutdown` observes `true` or its sender is dropped.
pub fn spawn_reaper(
    limiter: Arc<SlidingWindowRateLimiter>,
    clock: Arc<dyn Clock>,
    settings: ReaperSettings,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        interval = ?settings.interval,
        retention_seconds = settings.retention_seconds,
        "Starting rate limit reaper"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = limiter.reap(clock.now(), settings.retention_seconds);
                    debug!(removed = removed, remaining = limiter.key_count(), "Reaper sweep finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Rate limit reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::window::RateLimiterConfig;

    #[tokio::test]
    async fn test_reaper_sweeps_and_stops() {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(
            RateLimiterConfig::new(5, 10.0).unwrap(),
        ));
        let clock = Arc::new(ManualClock::new(0.0));

        limiter.check("idle", 0.0).unwrap();
        limiter.check("busy", 0.0).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_reaper(
            limiter.clone(),
            clock.clone(),
            ReaperSettings {
                interval: Duration::from_millis(10),
                retention_seconds: 30.0,
            },
            rx,
        );

        clock.set(100.0);
        limiter.check("busy", 100.0).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(limiter.key_count(), 1);
        assert_eq!(limiter.snapshot("busy").unwrap().count, 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reaper_stops_when_sender_dropped() {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(
            RateLimiterConfig::new(5, 10.0).unwrap(),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_reaper(
            limiter,
            Arc::new(ManualClock::new(0.0)),
            ReaperSettings {
                interval: Duration::from_secs(3600),
                retention_seconds: 30.0,
            },
            rx,
        );

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
