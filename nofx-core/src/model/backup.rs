// nofx-core/src/model/backup.rs
// ============================================================================
// Module: BackupMeta
// Description: The BackupMeta entity (§3, §4.I).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::BackupId;
use crate::time::Timestamp;

/// Which store driver a backup snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Filesystem data tree.
    Fs,
    /// Relational (DB driver) table dump.
    Db,
}

/// What was included in a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupScope {
    /// Store data only.
    Data,
    /// Store data plus the working project tree.
    WithProject,
    /// Working project tree only.
    ProjectOnly,
}

impl BackupScope {
    /// Whether this scope includes store data.
    #[must_use]
    pub const fn includes_data(self) -> bool {
        matches!(self, Self::Data | Self::WithProject)
    }

    /// Whether this scope includes the working project tree.
    #[must_use]
    pub const fn includes_project(self) -> bool {
        matches!(self, Self::WithProject | Self::ProjectOnly)
    }
}

/// Outcome of the best-effort cloud upload for a backup archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudUploadOutcome {
    /// Whether the upload succeeded.
    pub uploaded: bool,
    /// Remote path, if uploaded.
    pub path: Option<String>,
    /// Error message, if the upload failed.
    pub error: Option<String>,
}

/// Metadata describing one backup archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    /// Backup identifier, `<iso-timestamp-safe>-<slug>`.
    pub id: BackupId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Human-readable title (derived from the latest run's title, or `"nofx"`).
    pub title: String,
    /// Optional caller-supplied note.
    pub note: Option<String>,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Which driver was snapshotted.
    pub kind: BackupKind,
    /// What was included.
    pub scope: BackupScope,
    /// Best-effort cloud upload outcome, if attempted.
    pub cloud: Option<CloudUploadOutcome>,
}
