// nofx-core/src/observability.rs
// ============================================================================
// Module: Observability
// Description: Ambient per-job context propagation and the runtime trace-log
// toggle (§4.H).
// ============================================================================

//! Replaces the source's "ambient logger mixin reaching into current
//! context" pattern (§9 Design Notes) with an explicit [`JobContext`] value
//! threaded through `tokio::task_local!`. A request/job/relay-tick handler
//! establishes a scope once; every `tracing` call nested inside it — however
//! deep — observes the same context without passing it as a parameter, and a
//! nested task may enter a narrower scope that overrides specific fields
//! while inheriting the rest.

use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::ProjectId;
use crate::ids::RunId;
use crate::ids::StepId;

tokio::task_local! {
    static JOB_CONTEXT: JobContext;
}

/// Ambient context propagated through the stack for one request, job, or
/// relay tick (§4.H).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    /// Correlates one external request across its downstream effects.
    pub request_id: Option<String>,
    /// The run a job belongs to.
    pub run_id: Option<RunId>,
    /// The step a job belongs to.
    pub step_id: Option<StepId>,
    /// The external provider a handler is calling, if any.
    pub provider: Option<String>,
    /// Current retry attempt, 0-based.
    pub retry_count: Option<u32>,
    /// The project the run belongs to.
    pub project_id: Option<ProjectId>,
}

impl JobContext {
    /// Returns the ambient context of the currently executing task, or the
    /// default (empty) context if none was established.
    #[must_use]
    pub fn current() -> Self {
        JOB_CONTEXT.try_with(Clone::clone).unwrap_or_default()
    }

    /// Runs `fut` with `self` installed as the ambient context for its
    /// duration and every task it spawns that inherits the scope.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        JOB_CONTEXT.scope(self, fut).await
    }

    /// Derives a child context for a nested unit of work, inheriting every
    /// field except `retry_count`, which the caller sets explicitly.
    #[must_use]
    pub fn child_with_retry(&self, retry_count: u32) -> Self {
        Self { retry_count: Some(retry_count), ..self.clone() }
    }
}

/// Emits a structured `info`-level trace record tagged `{ trace: true, event,
/// ...fields }`, gated by [`TraceFlag::is_enabled`] (§4.H). Call sites should
/// check the flag themselves to avoid paying for `fields` construction when
/// tracing is off; this function does not re-check it.
pub fn trace(event: &str, fields: Value) {
    let ctx = JobContext::current();
    tracing::info!(
        trace = true,
        event,
        fields = %fields,
        request_id = ctx.request_id.as_deref(),
        run_id = ctx.run_id.as_ref().map(RunId::as_str),
        step_id = ctx.step_id.as_ref().map(StepId::as_str),
        "trace"
    );
}

/// Where the trace-log toggle's value comes from, in priority order (§4.H):
/// an environment variable, then a settings-sourced source, then a default.
pub trait TraceFlagSource: Send + Sync {
    /// Returns the environment-variable override, if set and parseable.
    fn env_override(&self) -> Option<bool>;

    /// Returns the settings-sourced value, if the settings layer is reachable.
    fn settings_value(&self) -> Option<bool>;
}

/// Reads `RUN_TRACE_LOG` / `NOFX_TRACE_LOG` from the process environment
/// (§6); `RUN_TRACE_LOG` takes precedence when both are set.
#[derive(Debug, Default)]
pub struct EnvTraceFlagSource;

impl TraceFlagSource for EnvTraceFlagSource {
    fn env_override(&self) -> Option<bool> {
        std::env::var("RUN_TRACE_LOG")
            .ok()
            .or_else(|| std::env::var("NOFX_TRACE_LOG").ok())
            .and_then(|value| parse_bool_env(&value))
    }

    fn settings_value(&self) -> Option<bool> {
        None
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Default value when neither an env override nor a settings value is
/// available.
const DEFAULT_TRACE_ENABLED: bool = false;

/// How long a resolved trace-flag value is cached before being recomputed
/// (§4.H).
const TRACE_FLAG_CACHE_TTL: Duration = Duration::from_secs(15);

/// Runtime-toggleable trace-log flag, cached for 15 seconds (§4.H). Reifies
/// the source's "ad-hoc global cache for trace flag" (§9 Design Notes) as an
/// explicit, constructed-once holder rather than a bare static.
pub struct TraceFlag {
    source: Box<dyn TraceFlagSource>,
    cached: RwLock<(Instant, bool)>,
}

impl TraceFlag {
    /// Creates a new holder backed by the given source, with an initial
    /// resolution performed eagerly so the first read never blocks on I/O.
    #[must_use]
    pub fn new(source: Box<dyn TraceFlagSource>) -> Self {
        let value = resolve(source.as_ref());
        Self { source, cached: RwLock::new((Instant::now(), value)) }
    }

    /// Creates a holder backed by [`EnvTraceFlagSource`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Box::new(EnvTraceFlagSource))
    }

    /// Returns whether tracing is enabled, refreshing from the source if the
    /// cached value is older than [`TRACE_FLAG_CACHE_TTL`].
    #[must_use]
    #[allow(
        clippy::significant_drop_tightening,
        reason = "the write lock must stay held across the refresh to avoid a redundant recompute under contention"
    )]
    pub fn is_enabled(&self) -> bool {
        {
            let guard = self.cached.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.0.elapsed() < TRACE_FLAG_CACHE_TTL {
                return guard.1;
            }
        }
        let mut guard = self.cached.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.0.elapsed() < TRACE_FLAG_CACHE_TTL {
            return guard.1;
        }
        let value = resolve(self.source.as_ref());
        *guard = (Instant::now(), value);
        value
    }
}

fn resolve(source: &dyn TraceFlagSource) -> bool {
    source.env_override().or_else(|| source.settings_value()).unwrap_or(DEFAULT_TRACE_ENABLED)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        env: Option<bool>,
        settings: Option<bool>,
    }

    impl TraceFlagSource for FixedSource {
        fn env_override(&self) -> Option<bool> {
            self.env
        }

        fn settings_value(&self) -> Option<bool> {
            self.settings
        }
    }

    #[test]
    fn env_override_wins_over_settings() {
        let flag = TraceFlag::new(Box::new(FixedSource { env: Some(true), settings: Some(false) }));
        assert!(flag.is_enabled());
    }

    #[test]
    fn falls_back_to_settings_then_default() {
        let with_settings = TraceFlag::new(Box::new(FixedSource { env: None, settings: Some(true) }));
        assert!(with_settings.is_enabled());

        let with_neither = TraceFlag::new(Box::new(FixedSource { env: None, settings: None }));
        assert!(!with_neither.is_enabled());
    }

    #[test]
    fn parses_common_boolean_spellings() {
        assert_eq!(parse_bool_env("true"), Some(true));
        assert_eq!(parse_bool_env("0"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[tokio::test]
    async fn job_context_scope_is_visible_to_nested_tasks() {
        let ctx = JobContext { run_id: Some(RunId::new("r1")), ..JobContext::default() };
        ctx.scope(async {
            assert_eq!(JobContext::current().run_id, Some(RunId::new("r1")));
        })
        .await;
        assert_eq!(JobContext::current().run_id, None);
    }
}
