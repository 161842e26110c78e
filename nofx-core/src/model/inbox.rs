// nofx-core/src/model/inbox.rs
// ============================================================================
// Module: InboxEntry
// Description: The idempotency dedup-set entry (§3, §4.G).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::InboxKey;
use crate::time::Timestamp;

/// A durable marker recording that a key has been observed. Uniqueness on
/// `key`; `inboxMarkIfNew` is an atomic insert-or-ignore over this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    /// The deduplication key.
    pub key: InboxKey,
    /// When this key was first observed.
    pub created_at: Timestamp,
}

impl InboxEntry {
    /// Creates a new inbox entry observed now.
    #[must_use]
    pub fn new(key: InboxKey) -> Self {
        Self { key, created_at: Timestamp::now() }
    }
}
