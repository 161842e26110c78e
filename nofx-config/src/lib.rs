// nofx-config/src/lib.rs
// ============================================================================
// Crate: nofx-config
// Description: The env-var driven process `Config` (§4.K), named default/
// range constants (`limits`), and the settings-file leg of the trace-log
// toggle's three-source priority chain (§4.H).
// ============================================================================

//! Every environment variable named in §6 is read exactly once, here, into
//! one typed [`Config`] assembled at process start (`Config::from_env`).
//! Nothing downstream re-reads `std::env` for a recognised knob — this is
//! the corpus's own "reify ad-hoc global caches as a config object
//! constructed at process start" pattern (§9 Design Notes), applied to the
//! run/step pipeline's own knobs rather than the corpus's original ones.

#![forbid(unsafe_code)]

pub mod config;
pub mod limits;
pub mod trace_source;

pub use config::Config;
pub use config::ConfigError;
pub use config::DataDriver;
pub use config::QueueDriver;
pub use trace_source::SettingsTraceFlagSource;
