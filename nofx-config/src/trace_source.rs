// nofx-config/src/trace_source.rs
// ============================================================================
// Module: Settings Trace Flag Source
// Description: The settings-file leg of the three-source trace-log toggle
// (env -> settings -> default), completing `nofx_core::observability`'s
// `TraceFlagSource` contract (§4.H).
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use nofx_core::observability::TraceFlagSource;
use serde::Deserialize;

/// On-disk settings document. Only the one field this component reads is
/// modeled; an operator's settings file may carry unrelated keys that this
/// type simply ignores via `#[serde(default)]` plus no `deny_unknown_fields`.
#[derive(Debug, Deserialize, Default)]
struct Settings {
    #[serde(default)]
    trace_log: Option<bool>,
}

/// Reads the env override per §6 (`RUN_TRACE_LOG` / `NOFX_TRACE_LOG`) and
/// falls back to a `trace_log` boolean in a JSON settings file, completing
/// the three-source priority order `nofx_core::observability::TraceFlag`
/// applies (env, then this source's settings value, then its built-in
/// default).
pub struct SettingsTraceFlagSource {
    settings_path: Option<PathBuf>,
}

impl SettingsTraceFlagSource {
    /// Creates a source reading settings from `settings_path`, if given.
    #[must_use]
    pub fn new(settings_path: Option<PathBuf>) -> Self {
        Self { settings_path }
    }

    /// Reads and parses the settings file at `path`, if it exists and parses.
    fn read_settings(path: &Path) -> Option<Settings> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl TraceFlagSource for SettingsTraceFlagSource {
    fn env_override(&self) -> Option<bool> {
        std::env::var("RUN_TRACE_LOG")
            .ok()
            .or_else(|| std::env::var("NOFX_TRACE_LOG").ok())
            .and_then(|value| parse_bool(&value))
    }

    fn settings_value(&self) -> Option<bool> {
        let path = self.settings_path.as_ref()?;
        Self::read_settings(path)?.trace_log
    }
}

/// Parses a boolean environment-variable style string.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
