// nofx-resilience/src/rate_limiter.rs
// ============================================================================
// Module: Rate Limiter
// Description: Sliding-window rate limiter (§4.J).
// ============================================================================

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// Sliding-window rate limiter configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum calls allowed within `window`.
    pub max_calls: u32,
    /// The sliding window duration.
    pub window: Duration,
}

/// Sliding-window rate limiter (§4.J). `check_and_track` awaits until
/// capacity is available, then records the call.
pub struct RateLimiter {
    config: RateLimiterConfig,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = usize::try_from(config.max_calls).unwrap_or(usize::MAX);
        Self { config, timestamps: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Awaits until capacity is available within the sliding window, then
    /// records this call and returns.
    pub async fn check_and_track(&self) {
        loop {
            let wait = {
                let mut timestamps =
                    self.timestamps.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let now = Instant::now();
                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) >= self.config.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                let max_calls = usize::try_from(self.config.max_calls).unwrap_or(usize::MAX);
                if timestamps.len() < max_calls {
                    timestamps.push_back(now);
                    None
                } else {
                    timestamps.front().map(|&oldest| self.config.window.saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Returns the number of calls currently counted within the window,
    /// without mutating state (used for metrics).
    #[must_use]
    pub fn current_count(&self) -> usize {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.config.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_max_calls_immediately() {
        let limiter = RateLimiter::new(RateLimiterConfig { max_calls: 3, window: Duration::from_secs(60) });
        for _ in 0..3 {
            limiter.check_and_track().await;
        }
        assert_eq!(limiter.current_count(), 3);
    }

    #[tokio::test]
    async fn waits_for_window_to_free_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig { max_calls: 1, window: Duration::from_millis(30) });
        limiter.check_and_track().await;
        let started = Instant::now();
        limiter.check_and_track().await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
