// nofx-config/src/limits.rs
// ============================================================================
// Module: Limits
// Description: Named defaults and valid ranges for every environment-variable
// knob in §6, in the corpus's "named pub(crate) const, single source of
// truth" style rather than inline magic numbers at each call site.
// ============================================================================

/// Default step handler timeout (§4.D, §6 `STEP_TIMEOUT_MS`).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;
/// Smallest accepted `STEP_TIMEOUT_MS`. Below this a timeout would fire
/// before most handlers could plausibly make progress.
pub const MIN_STEP_TIMEOUT_MS: u64 = 100;
/// Largest accepted `STEP_TIMEOUT_MS`. Above this the operator almost
/// certainly meant to disable the timeout some other way.
pub const MAX_STEP_TIMEOUT_MS: u64 = 3_600_000;

/// Default worker concurrency per topic (§4.B, §6 `WORKER_CONCURRENCY`).
pub const DEFAULT_WORKER_CONCURRENCY: u32 = 1;
/// Largest accepted `WORKER_CONCURRENCY`.
pub const MAX_WORKER_CONCURRENCY: u32 = 256;

/// Default outbox relay poll interval (§4.C, §6 `OUTBOX_RELAY_INTERVAL_MS`).
pub const DEFAULT_OUTBOX_RELAY_INTERVAL_MS: u64 = 1000;
/// Smallest accepted `OUTBOX_RELAY_INTERVAL_MS`; below this the relay would
/// busy-poll the store.
pub const MIN_OUTBOX_RELAY_INTERVAL_MS: u64 = 10;

/// Default outbox relay batch size (§4.C, §6 `OUTBOX_RELAY_BATCH`).
pub const DEFAULT_OUTBOX_RELAY_BATCH: u32 = 25;
/// Largest accepted `OUTBOX_RELAY_BATCH`.
pub const MAX_OUTBOX_RELAY_BATCH: u32 = 10_000;

/// Default queue retry attempts budget before dead-lettering (§4.B).
pub const DEFAULT_QUEUE_ATTEMPTS: u32 = 5;

/// Exponential backoff base delay (§4.B `BASE`).
pub const BACKOFF_BASE_MS: u64 = 1000;
/// Exponential backoff cap (§4.B `CAP`).
pub const BACKOFF_CAP_MS: u64 = 60_000;

/// Default queue backpressure age threshold (§4.B) before a producer delays
/// its own enqueue.
pub const DEFAULT_BACKPRESSURE_THRESHOLD_MS: u64 = 5000;

/// Default store-connection pool size multiplier relative to worker
/// concurrency (§5: "pool size = 2x worker concurrency").
pub const STORE_POOL_SIZE_MULTIPLIER: u32 = 2;
/// Idle connection timeout for pooled store connections (§5).
pub const STORE_POOL_IDLE_TIMEOUT_SECS: u64 = 30;

/// Graceful shutdown drain budget for in-flight `runStep` calls on SIGTERM (§5).
pub const GRACEFUL_SHUTDOWN_DRAIN_SECS: u64 = 10;

/// Trace-flag cache TTL (§4.H).
pub const TRACE_FLAG_CACHE_TTL_SECS: u64 = 15;
