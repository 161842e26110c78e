// nofx-backup/src/blob.rs
// ============================================================================
// Module: Blob Upload
// Description: Best-effort S3-compatible upload of a finished backup archive
// (§4.I.1). Failure is never fatal to the backup itself; the caller records
// the outcome in `BackupMeta.cloud`.
// ============================================================================

//! Bridges the synchronous backup/restore call path to the async `aws-sdk-s3`
//! client the same way the corpus's own object-store adapter does: detect a
//! current Tokio runtime and `block_in_place` on a multi-threaded one,
//! otherwise spin a dedicated thread with its own single-use runtime.

use std::future::Future;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::runtime::RuntimeFlavor;

/// Failures uploading a backup archive to blob storage.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The archive file could not be read.
    #[error("failed to read archive: {0}")]
    Io(#[from] std::io::Error),
    /// The S3-compatible backend rejected the request.
    #[error("blob backend error: {0}")]
    Backend(String),
}

/// Blocks on a future using whichever runtime is reachable from the current
/// thread, matching the sync-to-async bridge used elsewhere in this
/// codebase for backup/restore's synchronous call path.
fn block_on_with_runtime<F, T>(future: F) -> Result<T, BlobError>
where
    F: Future<Output = Result<T, BlobError>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
            return tokio::task::block_in_place(|| handle.block_on(future));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        std::thread::spawn(move || {
            let result = Runtime::new().map_err(|err| BlobError::Backend(err.to_string())).and_then(|runtime| runtime.block_on(future));
            let _ = tx.send(result);
        });
        return rx.recv().unwrap_or_else(|_| Err(BlobError::Backend("blob upload thread join failed".to_string())));
    }

    Runtime::new().map_err(|err| BlobError::Backend(err.to_string()))?.block_on(future)
}

/// A minimal S3-compatible blob storage client, scoped to what backup/restore
/// needs: uploading one archive per backup under a fixed bucket.
pub struct BlobClient {
    bucket: String,
}

impl BlobClient {
    /// Builds a client targeting `bucket`, loading credentials and region
    /// from the standard AWS environment/config chain.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }

    /// Uploads `archive_file` to `backups/<archive file name>` in the
    /// configured bucket, returning the remote key on success.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the archive cannot be read or the upload
    /// fails; callers treat this as best-effort and must not fail the
    /// surrounding backup operation on error.
    pub fn upload_archive(&self, archive_file: &Path) -> Result<String, BlobError> {
        let bytes = std::fs::read(archive_file)?;
        let file_name = archive_file.file_name().and_then(|name| name.to_str()).unwrap_or("backup.tar.gz").to_string();
        let key = format!("backups/{file_name}");
        let bucket = self.bucket.clone();
        let upload_key = key.clone();
        block_on_with_runtime(async move {
            let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            let client = Client::new(&config);
            client
                .put_object()
                .bucket(bucket)
                .key(upload_key)
                .body(ByteStream::from(bytes))
                .content_type("application/gzip")
                .send()
                .await
                .map_err(|err| BlobError::Backend(err.to_string()))?;
            Ok(())
        })?;
        Ok(key)
    }
}
