// nofx-backup/src/lib.rs
// ============================================================================
// Crate: nofx-backup
// Description: Backup/restore orchestration (§4.I) — stage, archive, and
// best-effort-upload a store snapshot; restore with a mandatory pre-restore
// snapshot; list archives by creation time.
// ============================================================================

//! Driver-specific staging stays inside `Store::stage_backup`/`restore_backup`
//! (`nofx-store-fs`, `nofx-store-sql`); this crate only ever sees a staged
//! directory tree, archives it, and moves bytes around.

#![forbid(unsafe_code)]

pub mod archive;
pub mod backup;
pub mod blob;

pub use backup::BackupError;
pub use backup::create_backup;
pub use backup::list_backups;
pub use backup::restore_backup;
pub use blob::BlobClient;
pub use blob::BlobError;
