// nofx-resilience/src/backoff.rs
// ============================================================================
// Module: Backoff
// Description: The exponential-backoff-with-full-jitter delay formula shared
// by the queue's retry policy (§4.B) and `executeWithRetry` (§4.J).
// ============================================================================

use std::time::Duration;

use rand::Rng;

/// Base delay, in milliseconds, for attempt 1 (§4.B).
pub const DEFAULT_BASE_MS: u64 = 1_000;

/// Maximum delay, in milliseconds, regardless of attempt count (§4.B).
pub const DEFAULT_CAP_MS: u64 = 60_000;

/// Full jitter fraction applied to the computed delay (§4.B: ±25%).
pub const DEFAULT_JITTER_FRACTION: f64 = 0.25;

/// Backoff parameters. `attempt` in [`delay_ms`]/[`jittered_delay`] is
/// 1-based, matching §4.B's `delay_ms(n) = min(CAP, BASE * 2^(n-1))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Base delay in milliseconds.
    pub base_ms: u64,
    /// Delay cap in milliseconds.
    pub cap_ms: u64,
    /// Jitter fraction applied symmetrically around the computed delay.
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_ms: DEFAULT_BASE_MS, cap_ms: DEFAULT_CAP_MS, jitter_fraction: DEFAULT_JITTER_FRACTION }
    }
}

impl BackoffConfig {
    /// Computes the un-jittered delay for 1-based `attempt`:
    /// `min(cap_ms, base_ms * 2^(attempt-1))`.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX).max(1));
        scaled.min(self.cap_ms)
    }

    /// Computes the delay for `attempt` with full jitter applied: a value
    /// drawn uniformly from `[delay * (1 - jitter), delay * (1 + jitter)]`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_ms(attempt) as f64;
        let spread = base * self.jitter_fraction;
        #[allow(clippy::cast_possible_truncation, reason = "jittered millisecond delays never approach u64::MAX")]
        let millis = rand::thread_rng().gen_range((base - spread).max(0.0)..=(base + spread)) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_table_matches_spec_formula() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_ms(1), 1_000);
        assert_eq!(cfg.delay_ms(2), 2_000);
        assert_eq!(cfg.delay_ms(3), 4_000);
        assert_eq!(cfg.delay_ms(4), 8_000);
        assert_eq!(cfg.delay_ms(5), 16_000);
        assert_eq!(cfg.delay_ms(6), 32_000);
        assert_eq!(cfg.delay_ms(7), 60_000); // would be 64_000, capped
        assert_eq!(cfg.delay_ms(20), 60_000);
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let cfg = BackoffConfig::default();
        for _ in 0..100 {
            let delay = cfg.jittered_delay(3).as_millis();
            assert!((3_000..=5_000).contains(&delay), "delay {delay} out of expected jitter range");
        }
    }
}
