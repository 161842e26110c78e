// nofx-core/src/errors.rs
// ============================================================================
// Module: Core Errors
// Description: The seven error kinds surfaced across store, queue, and runner.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! §7 names seven error kinds, each mapping to one surfaced machine code. Every
//! driver-specific error type in this workspace (`nofx-store-fs::FsStoreError`,
//! `nofx-store-sql::SqlStoreError`, `nofx-queue::QueueError`, ...) converts into
//! exactly one of these variants via `#[from]` at the point it crosses into
//! runner/recovery code, so callers outside a given driver only ever match on
//! these seven kinds.

use thiserror::Error;

/// Domain error surfaced by the store, queue, runner, and recovery layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Structural input problem.
    #[error("validation error: {0}")]
    Validation(String),

    /// Addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation disallowed in the entity's current state.
    #[error("not retryable: {0}")]
    NotRetryable(String),

    /// Idempotency or uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network/queue/store timeout or 5xx-equivalent; retried per resilience policy.
    #[error("transient error: {0}")]
    Transient(String),

    /// Tool or resource disallowed by the policy envelope.
    #[error("policy error: {0}")]
    Policy(String),

    /// Unrecoverable local state.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Returns the machine-readable exit/status code associated with this error
    /// kind, per §6's CLI exit-code contract and §7's "one machine code" rule.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::NotFound(_) => 3,
            Self::NotRetryable(_) | Self::Policy(_) => 4,
            Self::Conflict(_) | Self::Transient(_) | Self::Fatal(_) => 5,
        }
    }

    /// Returns whether an operation resulting in this error kind is safe to retry
    /// under the resilience policy (§4.J). Validation, not-found, not-retryable,
    /// conflict, and policy errors are never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(CoreError::Validation("x".into()).exit_code(), 2);
        assert_eq!(CoreError::NotFound("x".into()).exit_code(), 3);
        assert_eq!(CoreError::NotRetryable("x".into()).exit_code(), 4);
        assert_eq!(CoreError::Policy("x".into()).exit_code(), 4);
        assert_eq!(CoreError::Conflict("x".into()).exit_code(), 5);
        assert_eq!(CoreError::Transient("x".into()).exit_code(), 5);
        assert_eq!(CoreError::Fatal("x".into()).exit_code(), 5);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoreError::Transient("x".into()).is_retryable());
        assert!(!CoreError::Policy("x".into()).is_retryable());
        assert!(!CoreError::Validation("x".into()).is_retryable());
    }
}
