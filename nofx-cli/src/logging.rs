// nofx-cli/src/logging.rs
// ============================================================================
// Module: Logging
// Description: Structured logging setup (§4.H, §6 `LOG_LEVEL`/`LOG_FILE_*`)
// shared by every CLI subcommand.
// ============================================================================

//! `tracing-subscriber`'s `fmt` layer is filtered by `LOG_LEVEL` (passed
//! through to `EnvFilter` verbatim, §4.K); when `LOG_FILE_ENABLED` is set, a
//! `tracing-appender` non-blocking rolling file sink is layered in alongside
//! stderr rather than replacing it, so an operator watching the foreground
//! process still sees output even with file logging on.

use nofx_config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global `tracing` subscriber for this process, per `config`.
/// The returned guard must be held for the process lifetime when file
/// logging is enabled — dropping it flushes and closes the non-blocking
/// writer.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    if config.log_file_enabled {
        let (writer, guard) = file_writer(config);
        let file_layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false).with_target(false);
        tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        None
    }
}

/// Builds the non-blocking file writer `init` layers in when file logging is
/// enabled, preferring an exact `LOG_FILE_PATH` over a daily-rolling
/// `LOG_FILE_DIR`.
fn file_writer(config: &Config) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    if let Some(path) = &config.log_file_path {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("nofx.log");
        let appender = tracing_appender::rolling::never(dir, file_name);
        return tracing_appender::non_blocking(appender);
    }
    let dir = config.log_file_dir.clone().unwrap_or_else(|| std::path::PathBuf::from("./logs"));
    let appender = tracing_appender::rolling::daily(dir, "nofx.log");
    tracing_appender::non_blocking(appender)
}
