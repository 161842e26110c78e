// nofx-backup/src/backup.rs
// ============================================================================
// Module: Backup / Restore
// Description: `createBackup`/`restoreBackup`/`listBackups` orchestration
// (§4.I) over a driver-agnostic `Store` and the archive/blob helpers.
// ============================================================================

//! The staged tree this module builds has two possible top-level entries:
//! `data/` (whatever the store driver wrote via [`Store::stage_backup`] — a
//! copied FS data root, or a SQLite file) and `project/` (a copy of the
//! working tree, present only when the backup scope includes it). This is a
//! generalization of §4.I's per-kind staging description: rather than this
//! crate special-casing "FS copies a directory, DB dumps per-table JSON", the
//! driver-specific half is delegated entirely to `Store::stage_backup`/
//! `restore_backup`, and this module only ever handles the common `data/` +
//! `project/` envelope around it. See `DESIGN.md` for the full rationale.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use nofx_core::errors::CoreError;
use nofx_core::ids::BackupId;
use nofx_core::model::BackupKind;
use nofx_core::model::BackupMeta;
use nofx_core::model::BackupScope;
use nofx_core::model::CloudUploadOutcome;
use nofx_core::store::Store;
use nofx_core::time::Timestamp;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::archive;
use crate::archive::ArchiveError;
use crate::blob::BlobClient;

/// Project-tree entries excluded from a `with-project`/`project-only` backup
/// (§4.I).
const PROJECT_EXCLUDES: &[&str] = &["node_modules", ".git", "local_data/backups", "coverage", "test-results", "trash"];

/// Backup/restore failures.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] CoreError),
    /// Archive packing/unpacking failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// A filesystem operation outside the store/archive layers failed.
    #[error("backup io error: {0}")]
    Io(#[from] std::io::Error),
    /// `restoreBackup` was asked for an id with no matching meta file.
    #[error("backup not found: {0}")]
    NotFound(String),
}

/// Lower-cases `text`, replaces runs of non-alphanumeric characters with a
/// single `-`, and trims leading/trailing `-` (§4.I backup id slugging).
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() { "nofx".to_string() } else { slug }
}

/// Allocates a backup id: `<iso-timestamp-safe>-<slug>` (§4.I).
fn allocate_id(now: Timestamp, title: &str) -> BackupId {
    let iso = now.to_rfc3339().unwrap_or_else(|_| now.unix_millis().to_string());
    let safe = iso.replace(':', "-").replace('.', "-");
    BackupId::from(format!("{safe}-{}", slugify(title)))
}

/// Picks the title backup ids are slugged from: the most recent run's title,
/// or `"nofx"` if there are no runs or it has none.
async fn latest_run_title(store: &Arc<dyn Store>) -> Result<String, BackupError> {
    let runs = store.list_runs(None).await?;
    Ok(runs.into_iter().find_map(|run| run.title).unwrap_or_else(|| "nofx".to_string()))
}

/// Recursively copies `src` into `dest`, skipping any entry (at any depth)
/// whose file name appears in `excludes`.
fn copy_tree_excluding(src: &Path, dest: &Path, excludes: &[&str]) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name_str) = name.to_str() else { continue };
        if excludes.contains(&name_str) {
            continue;
        }
        let src_path = entry.path();
        let dest_path = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree_excluding(&src_path, &dest_path, excludes)?;
        } else {
            std::fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

/// Creates a backup per §4.I: stages `store` data and/or the project tree
/// under a temp directory, archives it as gzip-compressed tar under
/// `backups_dir`, best-effort-uploads the archive via `blob` if supplied, and
/// writes the resulting [`BackupMeta`] as `<id>.json` next to the archive.
///
/// # Errors
///
/// Returns [`BackupError`] if staging, archiving, or writing the meta file
/// fails. A failed blob upload is never an error here — it is recorded in
/// `BackupMeta.cloud` instead.
pub async fn create_backup(
    store: &Arc<dyn Store>,
    kind: BackupKind,
    scope: BackupScope,
    note: Option<String>,
    backups_dir: &Path,
    project_dir: Option<&Path>,
    blob: Option<&BlobClient>,
) -> Result<BackupMeta, BackupError> {
    let title = latest_run_title(store).await?;
    let now = Timestamp::now();
    let id = allocate_id(now, &title);

    let staging = tempfile::tempdir()?;
    if scope.includes_data() {
        store.stage_backup(&staging.path().join("data")).await?;
    }
    if scope.includes_project() {
        if let Some(project_dir) = project_dir {
            copy_tree_excluding(project_dir, &staging.path().join("project"), PROJECT_EXCLUDES)?;
        }
    }

    std::fs::create_dir_all(backups_dir)?;
    let archive_file = backups_dir.join(format!("{id}.tar.gz"));
    let size_bytes = archive::pack(staging.path(), &archive_file)?;

    let cloud = blob.map(|client| match client.upload_archive(&archive_file) {
        Ok(path) => CloudUploadOutcome { uploaded: true, path: Some(path), error: None },
        Err(err) => {
            warn!(backup_id = %id, error = %err, "best-effort backup upload failed");
            CloudUploadOutcome { uploaded: false, path: None, error: Some(err.to_string()) }
        }
    });

    let meta = BackupMeta { id, created_at: now, title, note, size_bytes, kind, scope, cloud };
    write_meta(backups_dir, &meta)?;
    info!(backup_id = %meta.id, size_bytes = meta.size_bytes, "backup created");
    Ok(meta)
}

/// Path of the `<id>.json` metadata sidecar for a backup.
fn meta_path(backups_dir: &Path, id: &BackupId) -> PathBuf {
    backups_dir.join(format!("{id}.json"))
}

/// Writes a backup's metadata sidecar as pretty JSON.
fn write_meta(backups_dir: &Path, meta: &BackupMeta) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(meta)?;
    std::fs::write(meta_path(backups_dir, &meta.id), bytes)
}

/// Reads and parses a backup's metadata sidecar.
fn read_meta(path: &Path) -> std::io::Result<BackupMeta> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(std::io::Error::other)
}

/// Restores a backup by id per §4.I: always takes a pre-restore snapshot of
/// `store` data first (tagged `auto-pre-restore:<id>`), then extracts the
/// archive and hands the staged tree back to the store driver.
///
/// # Errors
///
/// Returns [`BackupError::NotFound`] if no meta file matches `id`, or any
/// other [`BackupError`] variant if the pre-restore snapshot, extraction, or
/// store restore fails.
pub async fn restore_backup(
    store: &Arc<dyn Store>,
    id: &str,
    backups_dir: &Path,
    project_dir: Option<&Path>,
) -> Result<BackupMeta, BackupError> {
    let path = meta_path(backups_dir, &BackupId::from(id));
    if !path.exists() {
        return Err(BackupError::NotFound(id.to_string()));
    }
    let meta = read_meta(&path)?;

    let _pre_restore = create_backup(
        store,
        meta.kind,
        BackupScope::Data,
        Some(format!("auto-pre-restore:{id}")),
        backups_dir,
        None,
        None,
    )
    .await?;

    let archive_file = backups_dir.join(format!("{id}.tar.gz"));
    let extracted = tempfile::tempdir()?;
    archive::unpack(&archive_file, extracted.path())?;

    if meta.scope.includes_data() {
        store.restore_backup(&extracted.path().join("data")).await?;
    }
    if meta.scope.includes_project() {
        if let Some(project_dir) = project_dir {
            let staged_project = extracted.path().join("project");
            if staged_project.exists() {
                copy_tree_excluding(&staged_project, project_dir, &[])?;
            }
        }
    }

    info!(backup_id = %id, "backup restored");
    Ok(meta)
}

/// Lists every backup under `backups_dir`, newest first (§4.I).
///
/// # Errors
///
/// Returns [`BackupError::Io`] if `backups_dir` cannot be read.
pub fn list_backups(backups_dir: &Path) -> Result<Vec<BackupMeta>, BackupError> {
    if !backups_dir.exists() {
        return Ok(Vec::new());
    }
    let mut metas = Vec::new();
    for entry in std::fs::read_dir(backups_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            metas.push(read_meta(&path)?);
        }
    }
    metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(metas)
}

#[cfg(test)]
mod tests {
    use nofx_store_fs::FsStore;

    use super::*;

    #[tokio::test]
    async fn create_then_restore_round_trips_run_data() {
        let data_root = tempfile::tempdir().expect("data root");
        let store: Arc<dyn Store> = Arc::new(FsStore::open(data_root.path()).await.expect("open store"));
        let plan = nofx_core::model::Plan { goal: "hello".into(), steps: vec![], metadata: None };
        store.create_run(nofx_core::ids::ProjectId::new("p1"), plan).await.expect("create run");

        let backups_dir = tempfile::tempdir().expect("backups dir");
        let meta = create_backup(&store, BackupKind::Fs, BackupScope::Data, None, backups_dir.path(), None, None).await.expect("create backup");
        assert!(meta.size_bytes > 0);
        assert_eq!(meta.scope, BackupScope::Data);

        store.delete_run(&store.list_runs(None).await.expect("list")[0].id).await.expect("delete run");
        assert!(store.list_runs(None).await.expect("list after delete").is_empty());

        restore_backup(&store, meta.id.as_str(), backups_dir.path(), None).await.expect("restore backup");
        let restored = store.list_runs(None).await.expect("list after restore");
        assert_eq!(restored.len(), 1);

        // restoring wrote an auto-pre-restore snapshot too
        let all = list_backups(backups_dir.path()).expect("list backups");
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at >= all[1].created_at);
    }

    #[test]
    fn slug_collapses_non_alnum_runs() {
        assert_eq!(slugify("Hello, World!!"), "hello-world");
        assert_eq!(slugify(""), "nofx");
        assert_eq!(slugify("---"), "nofx");
    }
}
