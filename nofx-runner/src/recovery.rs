// nofx-runner/src/recovery.rs
// ============================================================================
// Module: Run Recovery
// Description: `retryStep` and `resumeRun` (§4.E), re-arming a step (or every
// recoverable step of a run) for another attempt.
// ============================================================================

//! A manual retry always recomputes the natural idempotency key and clears
//! whatever inbox entry the prior attempt left behind (§4.E): a retry is a
//! deliberate new attempt, not a redelivery, so it must not be swallowed by
//! its own prior observation.
//!
//! `__attempt` on the re-queued job is `step.attempts + 1` (§4.E, §6):
//! [`nofx_core::model::Step::attempts`] is incremented every time the step
//! transitions to `running`, so it already reflects the number of attempts
//! made so far, including across retries and process restarts.

use std::sync::Arc;

use nofx_core::errors::CoreError;
use nofx_core::ids::RunId;
use nofx_core::ids::StepId;
use nofx_core::idempotency;
use nofx_core::model::EventType;
use nofx_core::model::RunStatus;
use nofx_core::model::StepStatus;
use nofx_core::queue::STEP_READY_TOPIC;
use nofx_core::queue::StepReadyPayload;
use nofx_core::store::Store;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

/// Failure modes of [`retry_step`] and [`resume_run`].
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// No such step exists in the named run.
    #[error("step {step_id} not found in run {run_id}")]
    StepNotFound {
        /// The run that was searched.
        run_id: RunId,
        /// The step that could not be found.
        step_id: StepId,
    },
    /// No such run exists.
    #[error("run {0} not found")]
    RunNotFound(RunId),
    /// The step's current status does not accept a retry (§4.E:
    /// `{failed, timed_out, cancelled}` only).
    #[error("step {0} is not in a retryable status")]
    NotRetryable(StepId),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Re-arms one step for another attempt (§4.E `retryStep`): recomputes its
/// idempotency key, clears the prior inbox entry, transitions it back to
/// `queued`, and schedules it via the outbox.
///
/// # Errors
///
/// Returns [`RecoveryError::StepNotFound`] if the step does not exist,
/// [`RecoveryError::NotRetryable`] if its status is not one of
/// `{failed, timed_out, cancelled}`, or [`RecoveryError::Store`] on store I/O
/// failure.
pub async fn retry_step(store: &Arc<dyn Store>, run_id: &RunId, step_id: &StepId) -> Result<(), RecoveryError> {
    let lock = store.lock_run(run_id).await?;

    let Some(mut step) = store.get_step(run_id, step_id).await? else {
        return Err(RecoveryError::StepNotFound { run_id: run_id.clone(), step_id: step_id.clone() });
    };
    if !step.status.is_retryable() {
        return Err(RecoveryError::NotRetryable(step_id.clone()));
    }
    let previous_status = step.status;

    if let Some(previous_key) = step.idempotency_key.take() {
        store.inbox_clear(&previous_key).await?;
    }
    let fresh_key = idempotency::natural_key(run_id.as_str(), &step.name, &step.inputs_without_policy())?;
    step.idempotency_key = Some(fresh_key);
    step.transition_retry();
    store.update_step(&step).await?;

    let previous_status_json = serde_json::to_value(previous_status).unwrap_or(Value::Null);
    store
        .record_event(
            run_id,
            EventType::StepRetry,
            json!({ "previousStatus": previous_status_json }),
            Some(step_id.clone()),
        )
        .await?;
    store
        .record_event(run_id, EventType::RunResumed, json!({ "resumedBy": step_id.as_str() }), None)
        .await?;

    let next_attempt = step.attempts + 1;
    let payload = StepReadyPayload { run_id: run_id.clone(), step_id: step_id.clone(), attempt: Some(next_attempt) };
    let payload_json = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
    store.outbox_add(STEP_READY_TOPIC, payload_json).await?;

    drop(lock);
    Ok(())
}

/// Resumes a stalled run (§4.E `resumeRun`): if the run itself is terminal,
/// brings it back to `running`, then retries every step currently in
/// `{failed, timed_out}` (steps already `cancelled` by sibling-cancellation
/// are retried too, since they are part of "every recoverable step"). The
/// run-level `running` transition records no event of its own: `retry_step`
/// already records `run.resumed` for every step it re-arms, so a separate
/// event here would duplicate it.
///
/// # Errors
///
/// Returns [`RecoveryError::RunNotFound`] if the run does not exist, or
/// [`RecoveryError::Store`] on store I/O failure. Individual step retries
/// that fail with [`RecoveryError::NotRetryable`] cannot happen here (the
/// steps are filtered by status first) but a concurrent store failure on one
/// step aborts the remaining retries.
pub async fn resume_run(store: &Arc<dyn Store>, run_id: &RunId) -> Result<(), RecoveryError> {
    let Some(mut run) = store.get_run(run_id).await? else {
        return Err(RecoveryError::RunNotFound(run_id.clone()));
    };
    if run.status.is_terminal() {
        run.status = RunStatus::Running;
        run.ended_at = None;
        store.update_run(&run).await?;
    }

    let steps = store.list_steps(run_id).await?;
    for step in steps {
        if matches!(step.status, StepStatus::Failed | StepStatus::TimedOut | StepStatus::Cancelled) {
            retry_step(store, run_id, &step.id).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nofx_core::ids::ProjectId;
    use nofx_core::model::Plan;
    use nofx_core::model::PlanStep;
    use nofx_store_fs::FsStore;
    use serde_json::json;

    use super::*;

    async fn store() -> (Arc<dyn Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path().to_path_buf()).await.expect("open store");
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn retries_a_failed_step_back_to_queued() {
        let (store, _dir) = store().await;
        let plan = Plan { goal: "hello".into(), steps: vec![PlanStep { name: "s1".into(), tool: "fail".into(), inputs: json!({}) }], metadata: None };
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let mut step = store.create_step(&run.id, "s1", "fail", json!({})).await.expect("create step");
        step.transition_running();
        step.transition_terminal(StepStatus::Failed, Some(json!({ "error": "boom" })));
        store.update_step(&step).await.expect("update step");

        retry_step(&store, &run.id, &step.id).await.expect("retry step");

        let retried = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(retried.status, StepStatus::Queued);
        assert!(retried.outputs.is_none());
        assert!(retried.idempotency_key.is_some());

        let events = store.list_events(&run.id).await.expect("events");
        let retry_event = events.iter().find(|e| e.event_type == EventType::StepRetry).expect("step.retry recorded");
        assert_eq!(retry_event.payload, json!({ "previousStatus": "failed" }));
        let resumed_event = events.iter().find(|e| e.event_type == EventType::RunResumed).expect("run.resumed recorded");
        assert_eq!(resumed_event.payload, json!({ "resumedBy": step.id.as_str() }));

        let unsent = store.outbox_list_unsent(10).await.expect("outbox");
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].payload["__attempt"], json!(2));
    }

    #[tokio::test]
    async fn rejects_retrying_a_non_terminal_step() {
        let (store, _dir) = store().await;
        let plan = Plan { goal: "hello".into(), steps: vec![PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({}) }], metadata: None };
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "echo", json!({})).await.expect("create step");

        let err = retry_step(&store, &run.id, &step.id).await.expect_err("pending step is not retryable");
        assert!(matches!(err, RecoveryError::NotRetryable(_)));
    }

    #[tokio::test]
    async fn resume_run_brings_a_failed_run_back_to_running_and_retries_its_steps() {
        let (store, _dir) = store().await;
        let plan = Plan { goal: "hello".into(), steps: vec![PlanStep { name: "s1".into(), tool: "fail".into(), inputs: json!({}) }], metadata: None };
        let mut run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let mut step = store.create_step(&run.id, "s1", "fail", json!({})).await.expect("create step");
        step.transition_running();
        step.transition_terminal(StepStatus::Failed, Some(json!({ "error": "boom" })));
        store.update_step(&step).await.expect("update step");
        run.transition_terminal(RunStatus::Failed);
        store.update_run(&run).await.expect("update run");

        resume_run(&store, &run.id).await.expect("resume run");

        let resumed = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(resumed.status, RunStatus::Running);
        assert!(resumed.ended_at.is_none());
        let retried = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(retried.status, StepStatus::Queued);

        let events = store.list_events(&run.id).await.expect("events");
        let resumed_events: Vec<_> = events.iter().filter(|e| e.event_type == EventType::RunResumed).collect();
        assert_eq!(resumed_events.len(), 1, "one run.resumed per retried step, not a separate one for the run transition");
        assert_eq!(resumed_events[0].payload, json!({ "resumedBy": step.id.as_str() }));
    }
}
