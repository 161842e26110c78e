// nofx-runner/src/worker.rs
// ============================================================================
// Module: Worker Loop
// Description: Wires queue deliveries on `step.ready` to `StepRunner::run_step`
// under the idempotency inbox and a concurrency-bounding semaphore (§4.D.1).
// ============================================================================

//! A worker is a [`Queue::subscribe`] registration on [`STEP_READY_TOPIC`]
//! whose handler closes over `Arc<dyn Store>`, [`StepRunner`], and a
//! [`tokio::sync::Semaphore`] sized to `WORKER_CONCURRENCY` (§6). The inbox
//! idempotency check (§4.G) happens before a permit is acquired, so duplicate
//! deliveries never consume a concurrency slot — only genuinely new attempts
//! do.

use std::sync::Arc;

use async_trait::async_trait;
use nofx_core::errors::CoreError;
use nofx_core::idempotency;
use nofx_core::idempotency::InboxOutcome;
use nofx_core::queue::JobHandler;
use nofx_core::queue::Queue;
use nofx_core::queue::STEP_READY_TOPIC;
use nofx_core::queue::StepReadyPayload;
use nofx_core::store::Store;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::Instrument;
use tracing::info_span;
use tracing::warn;

use crate::runner::StepRunner;

/// Delivers one `step.ready` job to [`StepRunner::run_step`], degrading a
/// failed inbox check to at-least-once processing rather than blocking
/// (§4.G).
pub struct StepReadyHandler {
    store: Arc<dyn Store>,
    runner: Arc<StepRunner>,
    permits: Arc<Semaphore>,
}

impl StepReadyHandler {
    /// Creates a handler that runs up to `concurrency` steps at once.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, runner: Arc<StepRunner>, concurrency: usize) -> Self {
        Self { store, runner, permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }
}

#[async_trait]
impl JobHandler for StepReadyHandler {
    async fn handle(&self, payload: Value) -> Result<(), CoreError> {
        let payload: StepReadyPayload =
            serde_json::from_value(payload).map_err(|err| CoreError::Validation(format!("malformed step.ready payload: {err}")))?;
        let span = info_span!("step_ready", run_id = %payload.run_id, step_id = %payload.step_id, attempt = payload.attempt.unwrap_or(1));
        self.handle_inner(payload).instrument(span).await
    }
}

impl StepReadyHandler {
    async fn handle_inner(&self, payload: StepReadyPayload) -> Result<(), CoreError> {
        let Some(step) = self.store.get_step(&payload.run_id, &payload.step_id).await? else {
            // The step may have been administratively deleted since it was
            // enqueued; nothing left to do.
            return Ok(());
        };
        if step.status.is_terminal() {
            return Ok(());
        }

        let key = idempotency::resolve_key(None, payload.run_id.as_str(), &step.name, &step.inputs_without_policy())?;
        let outcome = idempotency::interpret_mark_result(self.store.inbox_mark_if_new(&key).await);
        if outcome == InboxOutcome::Duplicate {
            return Ok(());
        }

        let _permit = self.permits.acquire().await.map_err(|err| CoreError::Fatal(format!("worker semaphore closed: {err}")))?;
        let attempt = payload.attempt.unwrap_or(1);
        let result = self.runner.run_step(&payload.run_id, &payload.step_id, attempt).await;
        if let Err(err) = self.store.inbox_clear(&key).await {
            warn!(run_id = %payload.run_id, step_id = %payload.step_id, error = %err, "failed to clear inbox entry, it will expire naturally on redelivery");
        }
        result
    }
}

/// Starts `concurrency` workers consuming [`STEP_READY_TOPIC`] (§4.D.1). The
/// queue driver owns delivery scheduling; this only registers the handler
/// and sizes its internal concurrency semaphore — a durable driver still
/// honors `concurrency` as the in-process limit on simultaneously running
/// steps, distinct from whatever per-connection concurrency the broker
/// itself applies.
///
/// # Errors
///
/// Returns [`CoreError::Transient`] if the subscription cannot be
/// established.
pub async fn spawn_step_workers(
    queue: &Arc<dyn Queue>,
    store: Arc<dyn Store>,
    runner: Arc<StepRunner>,
    concurrency: usize,
) -> Result<(), CoreError> {
    let handler = Arc::new(StepReadyHandler::new(store, runner, concurrency));
    queue.subscribe(STEP_READY_TOPIC, handler).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use nofx_core::ids::ProjectId;
    use nofx_core::model::Plan;
    use nofx_core::model::PlanStep;
    use nofx_core::model::RunStatus;
    use nofx_core::model::StepStatus;
    use nofx_store_fs::FsStore;
    use nofx_tools::ToolRegistry;
    use serde_json::json;

    use super::*;

    async fn fixture() -> (Arc<dyn Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path().to_path_buf()).await.expect("open store");
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn s4_duplicate_delivery_runs_handler_exactly_once() {
        let (store, _dir) = fixture().await;
        let plan = Plan { goal: "hello".into(), steps: vec![PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({ "n": 1 }) }], metadata: None };
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "echo", json!({ "n": 1 })).await.expect("create step");
        store.update_step(&{ let mut s = step.clone(); s.status = StepStatus::Queued; s }).await.expect("queue step");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = Arc::new(StepRunner::new(store.clone(), tools, Duration::from_millis(500)));
        let handler = StepReadyHandler::new(store.clone(), runner, 4);

        let payload = json!({ "runId": run.id.as_str(), "stepId": step.id.as_str() });
        handler.handle(payload.clone()).await.expect("first delivery");
        handler.handle(payload.clone()).await.expect("second delivery is a no-op");
        handler.handle(payload).await.expect("third delivery is a no-op");

        let finished = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(finished.status, StepStatus::Succeeded);
        let events = store.list_events(&run.id).await.expect("events");
        let succeeded_count = events.iter().filter(|e| e.event_type == nofx_core::model::EventType::StepSucceeded).count();
        assert_eq!(succeeded_count, 1, "handler must run exactly once across duplicate deliveries");
        let run_after = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run_after.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn a_deleted_step_is_a_silent_no_op() {
        let (store, _dir) = fixture().await;
        let payload = json!({ "runId": "missing-run", "stepId": "missing-step" });
        let runner = Arc::new(StepRunner::new(store.clone(), Arc::new(ToolRegistry::with_builtin_handlers()), Duration::from_millis(500)));
        let handler = StepReadyHandler::new(store, runner, 1);
        handler.handle(payload).await.expect("missing step/run is a no-op, not an error");
    }
}
