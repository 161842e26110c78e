// nofx-store-fs/src/lock.rs
// ============================================================================
// Module: Run Lock
// Description: Advisory per-run file lock backing `runAtomically` (§4.A).
// ============================================================================

use std::fs;
use std::fs::File;
use std::path::Path;

use fs2::FileExt;
use nofx_core::errors::CoreError;
use nofx_core::store::RunLock;

/// Holds an exclusive advisory lock on a run's `.lock` file for as long as it
/// lives. Dropping it releases the lock, mirroring the `fs2::FileExt` idiom of
/// an OS-level flock tied to a file handle's lifetime.
pub struct FsRunLock {
    #[allow(
        dead_code,
        reason = "held only to keep the flock alive until this guard drops"
    )]
    file: File,
}

impl RunLock for FsRunLock {}

impl FsRunLock {
    /// Blocks the current thread until the exclusive lock on `path` is
    /// acquired, creating the lock file (and its parent directory) if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the lock file cannot be created or
    /// opened.
    pub fn acquire(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| CoreError::Transient(format!("create lock dir: {err}")))?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| CoreError::Transient(format!("open lock file: {err}")))?;
        file.lock_exclusive()
            .map_err(|err| CoreError::Transient(format!("acquire run lock: {err}")))?;
        Ok(Self { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("r1/.lock");
        let guard = FsRunLock::acquire(&path).expect("acquire");
        drop(guard);
        let guard2 = FsRunLock::acquire(&path).expect("reacquire after drop");
        drop(guard2);
    }

    #[test]
    fn second_exclusive_attempt_on_a_held_lock_fails_try_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("r1/.lock");
        let _guard = FsRunLock::acquire(&path).expect("acquire");
        let file = fs::OpenOptions::new().write(true).create(true).open(&path).expect("open");
        assert!(file.try_lock_exclusive().is_err());
    }
}
