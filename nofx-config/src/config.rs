// nofx-config/src/config.rs
// ============================================================================
// Module: Config
// Description: The single typed, validated process Config (§4.K), loaded
// once at startup from the environment variables named in §6.
// ============================================================================

//! Reifies the source's "ad-hoc global caches for config" (§9 Design Notes)
//! as one object constructed at process start: nothing downstream calls
//! `std::env::var` for a §6 knob directly, it only ever reads a field of
//! [`Config`]. A malformed or out-of-range value fails process start with a
//! [`ConfigError`] rather than silently clamping, matching the corpus's
//! fail-closed posture for its own config module.

use std::path::PathBuf;

use thiserror::Error;

use crate::limits;

/// Which `Queue` driver to construct (§6 `QUEUE_DRIVER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDriver {
    /// In-process, non-durable driver (tests, single-box mode).
    Memory,
    /// Redis-backed durable driver.
    Durable,
}

/// Which `Store` driver to construct (§6 `DATA_DRIVER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDriver {
    /// Filesystem driver.
    Fs,
    /// Relational (SQLite) driver.
    Db,
}

/// Failure to construct a valid [`Config`] from the environment (§4.K: fail
/// closed rather than clamp).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value of the wrong shape.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        /// The variable name.
        var: &'static str,
        /// The raw string value that failed to parse or validate.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Builds an [`ConfigError::InvalidValue`].
    fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue { var, value: value.into(), reason: reason.into() }
    }
}

/// The process-wide typed configuration (§4.K), assembled once from the
/// environment variables named in §6.
#[derive(Debug, Clone)]
pub struct Config {
    /// `QUEUE_DRIVER` (default: `memory`).
    pub queue_driver: QueueDriver,
    /// `DATA_DRIVER` (default: `fs`).
    pub data_driver: DataDriver,
    /// `WORKER_CONCURRENCY`, clamped validated to `[1, MAX_WORKER_CONCURRENCY]`.
    pub worker_concurrency: u32,
    /// `STEP_TIMEOUT_MS`, validated to `[MIN_STEP_TIMEOUT_MS, MAX_STEP_TIMEOUT_MS]`.
    pub step_timeout_ms: u64,
    /// `OUTBOX_RELAY_INTERVAL_MS`.
    pub outbox_relay_interval_ms: u64,
    /// `OUTBOX_RELAY_BATCH`.
    pub outbox_relay_batch: u32,
    /// `LOG_LEVEL` (passed through to `tracing_subscriber::EnvFilter`
    /// verbatim; not parsed here since its grammar is the filter's own).
    pub log_level: String,
    /// `LOG_FILE_ENABLED`.
    pub log_file_enabled: bool,
    /// `LOG_FILE_DIR`, used when `LOG_FILE_PATH` is unset.
    pub log_file_dir: Option<PathBuf>,
    /// `LOG_FILE_PATH`, overriding `LOG_FILE_DIR` with an exact path.
    pub log_file_path: Option<PathBuf>,
    /// `ARTIFACT_BUCKET`, the blob storage bucket backup/restore uploads to.
    pub artifact_bucket: Option<String>,
    /// `NOFX_DATA_ROOT`: the FS driver's data tree root, or the directory a
    /// SQLite database file lives under. Not named in §6's stable list (the
    /// spec only enumerates driver *selection*, not driver-specific paths)
    /// but every driver needs somewhere to put its files.
    pub data_root: PathBuf,
    /// `NOFX_REDIS_URL`: the durable queue driver's Redis connection string.
    /// Required when `queue_driver == Durable`.
    pub redis_url: Option<String>,
}

impl Config {
    /// Loads and validates [`Config`] from the current process environment
    /// (§6). Every knob is read exactly once, here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any variable holds a value
    /// that does not parse or falls outside its valid range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&std::env::var)
    }

    /// Testable core of [`Config::from_env`], parameterised over the lookup
    /// function so tests can supply a fixed environment without mutating
    /// the real process environment (which is global, unsynchronized, and
    /// unsafe to write concurrently with other tests).
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_source(lookup: &dyn Fn(&str) -> Result<String, std::env::VarError>) -> Result<Self, ConfigError> {
        let queue_driver = match lookup("QUEUE_DRIVER") {
            Ok(value) if value.eq_ignore_ascii_case("durable") => QueueDriver::Durable,
            Ok(value) if value.eq_ignore_ascii_case("memory") => QueueDriver::Memory,
            Ok(other) => return Err(ConfigError::invalid("QUEUE_DRIVER", other, "expected `memory` or `durable`")),
            Err(_) => QueueDriver::Memory,
        };
        let data_driver = match lookup("DATA_DRIVER") {
            Ok(value) if value.eq_ignore_ascii_case("db") => DataDriver::Db,
            Ok(value) if value.eq_ignore_ascii_case("fs") => DataDriver::Fs,
            Ok(other) => return Err(ConfigError::invalid("DATA_DRIVER", other, "expected `fs` or `db`")),
            Err(_) => DataDriver::Fs,
        };

        let worker_concurrency = parse_bounded(
            lookup,
            "WORKER_CONCURRENCY",
            limits::DEFAULT_WORKER_CONCURRENCY,
            1,
            limits::MAX_WORKER_CONCURRENCY,
        )?;
        let step_timeout_ms = parse_bounded_u64(
            lookup,
            "STEP_TIMEOUT_MS",
            limits::DEFAULT_STEP_TIMEOUT_MS,
            limits::MIN_STEP_TIMEOUT_MS,
            limits::MAX_STEP_TIMEOUT_MS,
        )?;
        let outbox_relay_interval_ms = parse_bounded_u64(
            lookup,
            "OUTBOX_RELAY_INTERVAL_MS",
            limits::DEFAULT_OUTBOX_RELAY_INTERVAL_MS,
            limits::MIN_OUTBOX_RELAY_INTERVAL_MS,
            u64::MAX,
        )?;
        let outbox_relay_batch = parse_bounded(
            lookup,
            "OUTBOX_RELAY_BATCH",
            limits::DEFAULT_OUTBOX_RELAY_BATCH,
            1,
            limits::MAX_OUTBOX_RELAY_BATCH,
        )?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_file_enabled = match lookup("LOG_FILE_ENABLED") {
            Ok(value) => parse_bool(&value).ok_or_else(|| ConfigError::invalid("LOG_FILE_ENABLED", value, "expected a boolean"))?,
            Err(_) => false,
        };
        let log_file_dir = lookup("LOG_FILE_DIR").ok().map(PathBuf::from);
        let log_file_path = lookup("LOG_FILE_PATH").ok().map(PathBuf::from);
        let artifact_bucket = lookup("ARTIFACT_BUCKET").ok();
        let data_root = lookup("NOFX_DATA_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./nofx_data"));
        let redis_url = lookup("NOFX_REDIS_URL").ok();

        if queue_driver == QueueDriver::Durable && redis_url.is_none() {
            return Err(ConfigError::invalid("NOFX_REDIS_URL", "", "required when QUEUE_DRIVER=durable"));
        }

        Ok(Self {
            queue_driver,
            data_driver,
            worker_concurrency,
            step_timeout_ms,
            outbox_relay_interval_ms,
            outbox_relay_batch,
            log_level,
            log_file_enabled,
            log_file_dir,
            log_file_path,
            artifact_bucket,
            data_root,
            redis_url,
        })
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

/// Looks up `var`, falling back to `default` if unset, and rejects values
/// outside `[min, max]`.
fn parse_bounded(
    lookup: &dyn Fn(&str) -> Result<String, std::env::VarError>,
    var: &'static str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    let Ok(raw) = lookup(var) else { return Ok(default) };
    let value: u32 = raw.trim().parse().map_err(|_| ConfigError::invalid(var, &raw, "expected a non-negative integer"))?;
    if value < min || value > max {
        return Err(ConfigError::invalid(var, &raw, format!("expected a value in [{min}, {max}]")));
    }
    Ok(value)
}

/// `u64` counterpart of [`parse_bounded`].
fn parse_bounded_u64(
    lookup: &dyn Fn(&str) -> Result<String, std::env::VarError>,
    var: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Ok(raw) = lookup(var) else { return Ok(default) };
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::invalid(var, &raw, "expected a non-negative integer"))?;
    if value < min || value > max {
        return Err(ConfigError::invalid(var, &raw, format!("expected a value in [{min}, {max}]")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn source(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn lookup_from(map: HashMap<String, String>) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).cloned().ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_nothing_set() {
        let config = Config::from_source(&lookup_from(source(&[]))).expect("defaults are valid");
        assert_eq!(config.queue_driver, QueueDriver::Memory);
        assert_eq!(config.data_driver, DataDriver::Fs);
        assert_eq!(config.worker_concurrency, limits::DEFAULT_WORKER_CONCURRENCY);
        assert_eq!(config.step_timeout_ms, limits::DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(config.outbox_relay_interval_ms, limits::DEFAULT_OUTBOX_RELAY_INTERVAL_MS);
        assert_eq!(config.outbox_relay_batch, limits::DEFAULT_OUTBOX_RELAY_BATCH);
        assert!(!config.log_file_enabled);
    }

    #[test]
    fn rejects_out_of_range_step_timeout() {
        let err = Config::from_source(&lookup_from(source(&[("STEP_TIMEOUT_MS", "1")]))).expect_err("below minimum");
        assert!(matches!(err, ConfigError::InvalidValue { var: "STEP_TIMEOUT_MS", .. }));
    }

    #[test]
    fn rejects_unknown_queue_driver() {
        let err = Config::from_source(&lookup_from(source(&[("QUEUE_DRIVER", "kafka")]))).expect_err("unknown driver");
        assert!(matches!(err, ConfigError::InvalidValue { var: "QUEUE_DRIVER", .. }));
    }

    #[test]
    fn durable_queue_requires_redis_url() {
        let err = Config::from_source(&lookup_from(source(&[("QUEUE_DRIVER", "durable")]))).expect_err("missing redis url");
        assert!(matches!(err, ConfigError::InvalidValue { var: "NOFX_REDIS_URL", .. }));

        let config = Config::from_source(&lookup_from(source(&[
            ("QUEUE_DRIVER", "durable"),
            ("NOFX_REDIS_URL", "redis://localhost:6379"),
        ])))
        .expect("redis url present");
        assert_eq!(config.queue_driver, QueueDriver::Durable);
    }

    #[test]
    fn accepts_valid_overrides() {
        let config = Config::from_source(&lookup_from(source(&[
            ("WORKER_CONCURRENCY", "8"),
            ("STEP_TIMEOUT_MS", "60000"),
            ("DATA_DRIVER", "db"),
            ("LOG_FILE_ENABLED", "true"),
            ("LOG_FILE_DIR", "/var/log/nofx"),
        ])))
        .expect("valid overrides");
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.step_timeout_ms, 60_000);
        assert_eq!(config.data_driver, DataDriver::Db);
        assert!(config.log_file_enabled);
        assert_eq!(config.log_file_dir, Some(PathBuf::from("/var/log/nofx")));
    }
}
