// nofx-store-sql/src/lib.rs
// ============================================================================
// Crate: nofx-store-sql
// Description: SQLite Store driver implementing nofx_core::store::Store
// (§4.A, §4.A.1).
// ============================================================================

#![forbid(unsafe_code)]

pub mod codec;
pub mod schema;
pub mod store;

pub use store::SqlStore;
pub use store::SqlStoreError;
