// nofx-core/src/idempotency.rs
// ============================================================================
// Module: Idempotency
// Description: Idempotency key derivation order and the inbox mark-if-new
// contract (§4.E, §4.G).
// ============================================================================

//! Idempotency key sources, in order (§4.G): (i) an explicit key carried on
//! the job payload; (ii) the natural key derived from `(runId, step.name,
//! canonical(inputs_without_policy))`. This module only derives the key;
//! [`crate::store::Store::inbox_mark_if_new`] performs the atomic
//! mark-if-new check itself.

use serde_json::Value;

use crate::errors::CoreError;
use crate::hashing;
use crate::ids::InboxKey;

/// Resolves the idempotency key a step attempt should use: the explicit key
/// if the job payload carried one, otherwise the natural key derived from
/// `(run_id, step_name, inputs_without_policy)` per §4.E.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] if natural-key derivation fails to
/// canonicalize `inputs_without_policy` (practically unreachable for a
/// well-formed [`serde_json::Value`]).
pub fn resolve_key(
    explicit_key: Option<&str>,
    run_id: &str,
    step_name: &str,
    inputs_without_policy: &Value,
) -> Result<InboxKey, CoreError> {
    if let Some(key) = explicit_key {
        return Ok(InboxKey::new(key));
    }
    natural_key(run_id, step_name, inputs_without_policy)
}

/// Derives the natural idempotency key per §4.E, independent of whether an
/// explicit key was supplied. Used by `retryStep` (§4.E), which always
/// recomputes a fresh natural key regardless of what the original attempt
/// used.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] if `inputs_without_policy` fails to
/// canonicalize.
pub fn natural_key(run_id: &str, step_name: &str, inputs_without_policy: &Value) -> Result<InboxKey, CoreError> {
    let key = hashing::natural_idempotency_key(run_id, step_name, inputs_without_policy)
        .map_err(|err| CoreError::Validation(err.to_string()))?;
    Ok(InboxKey::new(key))
}

/// Outcome of attempting to mark an idempotency key observed, folding in the
/// §4.G degrade-to-at-least-once rule: a store failure while checking the
/// inbox must not block processing, so it is treated identically to "first
/// observation."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// First observation (or the inbox check itself failed): proceed as new.
    ProceedAsNew,
    /// A prior observation exists: this delivery is a duplicate, acknowledge
    /// as a no-op.
    Duplicate,
}

/// Interprets the result of [`crate::store::Store::inbox_mark_if_new`] per
/// §4.G: a store error degrades to "proceed as new" rather than blocking.
#[must_use]
pub fn interpret_mark_result(result: Result<bool, CoreError>) -> InboxOutcome {
    match result {
        Ok(true) | Err(_) => InboxOutcome::ProceedAsNew,
        Ok(false) => InboxOutcome::Duplicate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_key_wins_over_natural_key() {
        let key = resolve_key(Some("explicit-1"), "r1", "s1", &json!({})).expect("key");
        assert_eq!(key.as_str(), "explicit-1");
    }

    #[test]
    fn falls_back_to_natural_key_when_no_explicit_key() {
        let key = resolve_key(None, "r1", "s1", &json!({"n": 1})).expect("key");
        let expected = natural_key("r1", "s1", &json!({"n": 1})).expect("key");
        assert_eq!(key, expected);
    }

    #[test]
    fn store_failure_degrades_to_proceed_as_new() {
        let outcome = interpret_mark_result(Err(CoreError::Transient("store down".into())));
        assert_eq!(outcome, InboxOutcome::ProceedAsNew);
    }

    #[test]
    fn duplicate_observation_is_recognised() {
        assert_eq!(interpret_mark_result(Ok(false)), InboxOutcome::Duplicate);
        assert_eq!(interpret_mark_result(Ok(true)), InboxOutcome::ProceedAsNew);
    }
}
