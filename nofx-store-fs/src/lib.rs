// nofx-store-fs/src/lib.rs
// ============================================================================
// Crate: nofx-store-fs
// Description: Filesystem Store driver implementing nofx_core::store::Store
// (§4.A). The on-disk layout is a public contract (§6) consumed directly by
// nofx-backup.
// ============================================================================

#![forbid(unsafe_code)]

pub mod atomic;
pub mod layout;
pub mod lock;
pub mod store;

pub use store::FsStore;
pub use store::FsStoreError;
