// nofx-core/src/lib.rs
// ============================================================================
// Crate: nofx-core
// Description: Domain model, driver-facing traits, and the ambient substrate
// (ids, errors, hashing, observability context) shared by every other crate
// in the workspace.
// ============================================================================

//! `nofx-core` is the leaf crate of the workspace: every other crate depends on
//! it, and it depends on nothing in-workspace. It defines:
//!
//! - the entities of §3 (`model`),
//! - opaque identifiers (`ids`),
//! - the seven error kinds of §7 (`errors`),
//! - canonical hashing / natural idempotency keys (`hashing`, `idempotency`),
//! - the [`store::Store`] and [`queue::Queue`] driver traits,
//! - the [`tool::ToolHandler`] capability trait and policy envelope,
//! - ambient observability context (`observability`).
//!
//! No concrete driver lives here: `nofx-store-fs`/`nofx-store-sql` implement
//! [`store::Store`], `nofx-queue` implements [`queue::Queue`], and
//! `nofx-tools` implements [`tool::ToolHandler`].

#![forbid(unsafe_code)]

pub mod errors;
pub mod hashing;
pub mod idempotency;
pub mod ids;
pub mod model;
pub mod observability;
pub mod queue;
pub mod store;
pub mod time;
pub mod tool;

pub use errors::CoreError;
