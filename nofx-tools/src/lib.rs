// nofx-tools/src/lib.rs
// ============================================================================
// Crate: nofx-tools
// Description: ToolRegistry (§4.F) and builtin tool handlers used by seed
// tests and local demos (§8's S1-S6 scenarios all dispatch through these).
// ============================================================================

//! Concrete production tool handlers (code generation, git PR, workspace
//! write) are out of scope (§1): this crate only provides the registry
//! itself plus a handful of builtin handlers (`echo`, `sleep`, `fail`,
//! `gate:<type>`) that exercise every success/failure/timeout/gate path the
//! runner needs to support.

#![forbid(unsafe_code)]

pub mod handlers;
pub mod registry;

pub use registry::ToolRegistry;
