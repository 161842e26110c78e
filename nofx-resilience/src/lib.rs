// nofx-resilience/src/lib.rs
// ============================================================================
// Crate: nofx-resilience
// Description: Retry-with-backoff, circuit breaker, and rate limiter (§4.J).
// ============================================================================

//! Resilience primitives used by adapters that call external services:
//! [`retry::execute_with_retry`], [`circuit_breaker::CircuitBreaker`], and
//! [`rate_limiter::RateLimiter`]. None of these are used by the store or
//! queue internals — those apply their own retry/DLQ policy directly (§4.B)
//! using [`backoff`]'s shared delay formula.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use backoff::BackoffConfig;
pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerConfig;
pub use rate_limiter::RateLimiter;
pub use rate_limiter::RateLimiterConfig;
pub use retry::RetryConfig;
pub use retry::execute_with_retry;
