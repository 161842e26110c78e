// nofx-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for idempotency keys and content integrity.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Natural idempotency keys (§4.E, §4.G) and store content-integrity checks both need
//! a canonical byte representation of a JSON value: same logical value, same bytes,
//! regardless of field insertion order. This module hashes canonical JSON using
//! RFC 8785 (JCS) so hashes are stable and replayable across processes.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

/// Default hash algorithm.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Derives the natural idempotency key for a step retry/initial enqueue per §4.E:
/// `hash("step:" + runId + ":" + stepName + ":" + canonical_json(inputs_without_policy))`.
///
/// The `_policy` sidecar is excluded by the caller before this is invoked (see
/// [`crate::tool::PolicyEnvelope`]), never by this function, so the hash is blind
/// to whether a policy envelope was even present.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when `inputs_without_policy` fails to
/// canonicalize.
pub fn natural_idempotency_key<T: Serialize + ?Sized>(
    run_id: &str,
    step_name: &str,
    inputs_without_policy: &T,
) -> Result<String, HashError> {
    let canonical = canonical_json_bytes(inputs_without_policy)?;
    let mut material = Vec::with_capacity(canonical.len() + run_id.len() + step_name.len() + 8);
    material.extend_from_slice(b"step:");
    material.extend_from_slice(run_id.as_bytes());
    material.extend_from_slice(b":");
    material.extend_from_slice(step_name.as_bytes());
    material.extend_from_slice(b":");
    material.extend_from_slice(&canonical);
    Ok(hash_bytes(DEFAULT_HASH_ALGORITHM, &material).value)
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_is_independent_of_key_order() {
        let a = json!({ "b": 1, "a": 2 });
        let b = json!({ "a": 2, "b": 1 });
        assert_eq!(canonical_json_bytes(&a).unwrap(), canonical_json_bytes(&b).unwrap());
    }

    #[test]
    fn natural_key_is_stable_across_field_reordering() {
        let a = natural_idempotency_key("run-1", "s1", &json!({ "text": "hi", "n": 1 })).unwrap();
        let b = natural_idempotency_key("run-1", "s1", &json!({ "n": 1, "text": "hi" })).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn natural_key_changes_with_run_or_step() {
        let base = natural_idempotency_key("run-1", "s1", &json!({ "n": 1 })).unwrap();
        let other_run = natural_idempotency_key("run-2", "s1", &json!({ "n": 1 })).unwrap();
        let other_step = natural_idempotency_key("run-1", "s2", &json!({ "n": 1 })).unwrap();
        assert_ne!(base, other_run);
        assert_ne!(base, other_step);
    }
}
