// nofx-resilience/src/circuit_breaker.rs
// ============================================================================
// Module: Circuit Breaker
// Description: closed -> open -> half-open -> closed state machine (§4.J).
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed through.
    Closed,
    /// Calls are rejected without attempting the underlying operation.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

/// Circuit breaker configuration (§4.J).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures, within the rolling window, that trip the
    /// breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    pub cool_down: Duration,
    /// Consecutive half-open successes required to close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cool_down: Duration::from_secs(30), success_threshold: 2 }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// A circuit breaker guarding calls to one external dependency (§4.J).
///
/// `closed --N consecutive failures--> open --cool-down elapsed--> half-open
/// --M consecutive successes--> closed`; any half-open failure reopens.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a new breaker in the `closed` state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Returns whether a call should be allowed through right now. Calling
    /// this when the breaker is `open` past its cool-down transitions it to
    /// `half-open` and allows exactly the calling probe through.
    #[must_use]
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.config.cool_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_half_open_successes += 1;
                if inner.consecutive_half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Returns the current state, for metrics/inspection.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cool_down: Duration::from_millis(10),
            success_threshold: 2,
        })
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = fast_breaker();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_needs_consecutive_successes_to_close() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_call());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
