// nofx-store-fs/src/atomic.rs
// ============================================================================
// Module: Atomic Writes
// Description: write-tempfile-fsync-rename helper, the basis of every mutation
// this store makes against the on-disk contract (§4.A).
// ============================================================================

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;

/// Serializes `value` to pretty JSON and writes it to `path` atomically: the
/// bytes land in a sibling tempfile first, are fsync'd, then renamed over the
/// destination. A reader never observes a partially written file, and a crash
/// mid-write leaves the previous file (or none) intact.
///
/// Creates the parent directory tree if it does not already exist.
///
/// # Errors
///
/// Returns the underlying [`io::Error`] from any filesystem step.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Reads and deserializes a JSON file, returning `Ok(None)` if it does not
/// exist rather than an error.
///
/// # Errors
///
/// Returns the underlying [`io::Error`] on any failure other than
/// [`io::ErrorKind::NotFound`], or a deserialization error wrapped as
/// [`io::ErrorKind::InvalidData`].
pub fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            Ok(Some(value))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn writes_and_reads_back_through_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a/b/c.json");
        write_json_atomic(&path, &json!({ "n": 1 })).expect("write");
        let read: serde_json::Value = read_json_opt(&path).expect("read").expect("present");
        assert_eq!(read, json!({ "n": 1 }));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.json");
        let read: Option<serde_json::Value> = read_json_opt(&path).expect("read");
        assert_eq!(read, None);
    }

    #[test]
    fn overwrite_replaces_previous_content_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.json");
        write_json_atomic(&path, &json!({ "n": 1 })).expect("write 1");
        write_json_atomic(&path, &json!({ "n": 2 })).expect("write 2");
        let read: serde_json::Value = read_json_opt(&path).expect("read").expect("present");
        assert_eq!(read, json!({ "n": 2 }));
    }
}
