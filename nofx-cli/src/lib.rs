// nofx-cli/src/lib.rs
// ============================================================================
// Crate: nofx-cli
// Description: Shared helpers for the operational CLI binary (§4.L/§6).
// ============================================================================

//! Process wiring and subcommand dispatch live in `src/main.rs`; this library
//! target holds the pieces unit tests exercise directly without going
//! through `clap::Parser`.

#![forbid(unsafe_code)]

pub mod drivers;
pub mod logging;
