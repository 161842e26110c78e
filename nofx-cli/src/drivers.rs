// nofx-cli/src/drivers.rs
// ============================================================================
// Module: Driver Construction
// Description: Builds the configured `Store`/`Queue` trait objects from
// `Config` (§4.K/§6 `DATA_DRIVER`/`QUEUE_DRIVER`), shared by every subcommand.
// ============================================================================

use std::sync::Arc;

use nofx_backup::BlobClient;
use nofx_config::Config;
use nofx_config::DataDriver;
use nofx_config::QueueDriver;
use nofx_core::errors::CoreError;
use nofx_core::queue::Queue;
use nofx_core::store::Store;
use nofx_queue::memory::MemoryQueue;
use nofx_store_fs::FsStore;
use nofx_store_sql::SqlStore;
use nofx_store_sql::schema::DB_FILE_NAME;

/// Opens the configured [`Store`] driver, rooted at `config.data_root`.
///
/// # Errors
///
/// Returns [`CoreError`] if the underlying driver fails to open.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>, CoreError> {
    match config.data_driver {
        DataDriver::Fs => Ok(Arc::new(FsStore::open(config.data_root.clone()).await?)),
        DataDriver::Db => Ok(Arc::new(SqlStore::open(config.data_root.join(DB_FILE_NAME)).await?)),
    }
}

/// Connects the configured [`Queue`] driver.
///
/// # Errors
///
/// Returns [`CoreError::Fatal`] if `QUEUE_DRIVER=durable` but no Redis URL
/// was configured, or [`CoreError::Transient`] if the durable driver fails
/// to connect.
pub async fn open_queue(config: &Config) -> Result<Arc<dyn Queue>, CoreError> {
    match config.queue_driver {
        QueueDriver::Memory => Ok(Arc::new(MemoryQueue::new())),
        QueueDriver::Durable => {
            let url = config.redis_url.as_deref().ok_or_else(|| CoreError::Fatal("NOFX_REDIS_URL is required when QUEUE_DRIVER=durable".to_string()))?;
            Ok(Arc::new(nofx_queue::durable::DurableQueue::connect(url).await?))
        }
    }
}

/// Returns the backups directory (§4.I: a subdirectory of the store root).
#[must_use]
pub fn backups_dir(config: &Config) -> std::path::PathBuf {
    config.data_root.join("backups")
}

/// Builds a best-effort blob upload client from `ARTIFACT_BUCKET`, if set.
#[must_use]
pub fn blob_client(config: &Config) -> Option<BlobClient> {
    config.artifact_bucket.clone().map(BlobClient::new)
}
