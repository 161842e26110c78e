// nofx-backup/src/archive.rs
// ============================================================================
// Module: Archive
// Description: Gzip-compressed tar packing/unpacking of a staged directory
// tree (§4.I.1).
// ============================================================================

use std::fs::File;
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::Archive;
use tar::Builder;
use thiserror::Error;

/// Archive packing/unpacking failures.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying filesystem or tar-stream I/O failure.
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Packs every entry under `src_dir` into a gzip-compressed tar written to
/// `dest_file`. The archive's root corresponds to `src_dir` itself (entries
/// are relative paths, no enclosing directory component).
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if `src_dir` cannot be walked or `dest_file`
/// cannot be written.
pub fn pack(src_dir: &Path, dest_file: &Path) -> Result<u64, ArchiveError> {
    let file = File::create(dest_file)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.append_dir_all(".", src_dir)?;
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    Ok(file.metadata()?.len())
}

/// Unpacks a gzip-compressed tar at `archive_file` into `dest_dir`, which is
/// created if it does not already exist.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if `archive_file` cannot be read or `dest_dir`
/// cannot be written.
pub fn unpack(archive_file: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(dest_dir)?;
    let file = File::open(archive_file)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);
    archive.unpack(dest_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_round_trips_a_tree() {
        let src = tempfile::tempdir().expect("src tempdir");
        std::fs::write(src.path().join("a.txt"), b"hello").expect("write a");
        std::fs::create_dir(src.path().join("sub")).expect("mkdir sub");
        std::fs::write(src.path().join("sub/b.txt"), b"world").expect("write b");

        let archive_dir = tempfile::tempdir().expect("archive tempdir");
        let archive_file = archive_dir.path().join("snapshot.tar.gz");
        let size = pack(src.path(), &archive_file).expect("pack");
        assert!(size > 0);

        let dest = tempfile::tempdir().expect("dest tempdir");
        unpack(&archive_file, dest.path()).expect("unpack");
        assert_eq!(std::fs::read(dest.path().join("a.txt")).expect("read a"), b"hello");
        assert_eq!(std::fs::read(dest.path().join("sub/b.txt")).expect("read b"), b"world");
    }
}
