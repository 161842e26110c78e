// nofx-store-fs/src/layout.rs
// ============================================================================
// Module: Layout
// Description: The on-disk path shape of §4.A, stable per §6.
// ============================================================================

//! ```text
//! <root>/runs/<runId>/run.json
//! <root>/runs/<runId>/steps/<stepId>.json
//! <root>/runs/<runId>/events/<eventId>.json
//! <root>/runs/<runId>/artifacts/<artifactId>.json
//! <root>/runs/<runId>/gates/<gateId>.json
//! <root>/inbox/<hash-of-key>.json
//! <root>/outbox/<outboxRowId>.json
//! ```
//!
//! Backup/restore (§4.I) treats this layout as the unit of copy: the whole
//! `<root>` tree excluding a sibling `backups/` directory that lives
//! alongside it but is not part of this store's own data.

use std::path::Path;
use std::path::PathBuf;

use nofx_core::hashing;
use nofx_core::hashing::HashAlgorithm;
use nofx_core::ids::ArtifactId;
use nofx_core::ids::EventId;
use nofx_core::ids::GateId;
use nofx_core::ids::InboxKey;
use nofx_core::ids::OutboxId;
use nofx_core::ids::RunId;
use nofx_core::ids::StepId;

/// Directory name excluded from `<root>` when staging a backup (it lives
/// under `<root>` in the default layout but is never itself backed up).
pub const BACKUPS_DIR_NAME: &str = "backups";

/// Returns `<root>/runs`.
#[must_use]
pub fn runs_dir(root: &Path) -> PathBuf {
    root.join("runs")
}

/// Returns `<root>/runs/<runId>`.
#[must_use]
pub fn run_dir(root: &Path, run_id: &RunId) -> PathBuf {
    runs_dir(root).join(run_id.as_str())
}

/// Returns `<root>/runs/<runId>/run.json`.
#[must_use]
pub fn run_file(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join("run.json")
}

/// Returns `<root>/runs/<runId>/.lock`, the advisory lock file for
/// `runAtomically`.
#[must_use]
pub fn run_lock_file(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join(".lock")
}

/// Returns `<root>/runs/<runId>/steps`.
#[must_use]
pub fn steps_dir(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join("steps")
}

/// Returns `<root>/runs/<runId>/steps/<stepId>.json`.
#[must_use]
pub fn step_file(root: &Path, run_id: &RunId, step_id: &StepId) -> PathBuf {
    steps_dir(root, run_id).join(format!("{}.json", step_id.as_str()))
}

/// Returns `<root>/runs/<runId>/events`.
#[must_use]
pub fn events_dir(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join("events")
}

/// Returns `<root>/runs/<runId>/events/<eventId>.json`.
#[must_use]
pub fn event_file(root: &Path, run_id: &RunId, event_id: &EventId) -> PathBuf {
    events_dir(root, run_id).join(format!("{}.json", event_id.as_str()))
}

/// Returns `<root>/runs/<runId>/artifacts`.
#[must_use]
pub fn artifacts_dir(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join("artifacts")
}

/// Returns `<root>/runs/<runId>/artifacts/<artifactId>.json`.
#[must_use]
pub fn artifact_file(root: &Path, run_id: &RunId, artifact_id: &ArtifactId) -> PathBuf {
    artifacts_dir(root, run_id).join(format!("{}.json", artifact_id.as_str()))
}

/// Returns `<root>/runs/<runId>/gates`.
#[must_use]
pub fn gates_dir(root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(root, run_id).join("gates")
}

/// Returns `<root>/runs/<runId>/gates/<gateId>.json`.
#[must_use]
pub fn gate_file(root: &Path, run_id: &RunId, gate_id: &GateId) -> PathBuf {
    gates_dir(root, run_id).join(format!("{}.json", gate_id.as_str()))
}

/// Returns `<root>/inbox`.
#[must_use]
pub fn inbox_dir(root: &Path) -> PathBuf {
    root.join("inbox")
}

/// Returns `<root>/inbox/<hash-of-key>.json`. The key is hashed rather than
/// used verbatim since arbitrary idempotency keys may contain characters
/// unsafe for a filename.
#[must_use]
pub fn inbox_file(root: &Path, key: &InboxKey) -> PathBuf {
    let digest = hashing::hash_bytes(HashAlgorithm::Sha256, key.as_str().as_bytes());
    inbox_dir(root).join(format!("{}.json", digest.value))
}

/// Returns `<root>/outbox`.
#[must_use]
pub fn outbox_dir(root: &Path) -> PathBuf {
    root.join("outbox")
}

/// Returns `<root>/outbox/<outboxRowId>.json`.
#[must_use]
pub fn outbox_file(root: &Path, id: &OutboxId) -> PathBuf {
    outbox_dir(root).join(format!("{}.json", id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_contract_shape() {
        let root = Path::new("/data");
        let run_id = RunId::new("r1");
        assert_eq!(run_file(root, &run_id), Path::new("/data/runs/r1/run.json"));
        assert_eq!(
            step_file(root, &run_id, &StepId::new("s1")),
            Path::new("/data/runs/r1/steps/s1.json")
        );
        assert_eq!(outbox_file(root, &OutboxId::new("o1")), Path::new("/data/outbox/o1.json"));
    }

    #[test]
    fn inbox_file_name_is_a_hash_not_the_raw_key() {
        let path = inbox_file(Path::new("/data"), &InboxKey::new("step:r1:s1:{}"));
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));
    }
}
