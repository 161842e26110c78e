// nofx-runner/src/runner.rs
// ============================================================================
// Module: Step Runner
// Description: `runStep`/`markStepTimedOut` (§4.D) and the run-completion /
// plan-advancement logic that rides along with it.
// ============================================================================

//! Grounded on the teacher engine's `handle_trigger_internal`: load state
//! under the run's lock, mutate it in a single linear pass, record the
//! decision/event, persist, return — rather than scattering the mutation
//! across several separately-locked calls.
//!
//! Two points go beyond the letter of §4.D because the literal algorithm
//! under-specifies them (see `DESIGN.md` for the full rationale):
//! - A policy-denied step still reaches the run-completion check (step 9);
//!   otherwise a denied step would leave its run stuck non-terminal forever,
//!   violating testable property 5.
//! - A step reaching `failed`/`timed_out` cancels every other non-terminal
//!   sibling step of the same run so `countRemainingSteps` can reach zero and
//!   the run can actually finish; a cancelled-without-running step is first
//!   walked through `running` so invariant 2 (`terminal ⇒ started_at set`)
//!   still holds for it.

use std::sync::Arc;
use std::time::Duration;

use nofx_core::errors::CoreError;
use nofx_core::ids::RunId;
use nofx_core::ids::StepId;
use nofx_core::model::EventType;
use nofx_core::model::RunStatus;
use nofx_core::model::Step;
use nofx_core::model::StepStatus;
use nofx_core::model::coerce_outputs_to_object;
use nofx_core::queue::STEP_READY_TOPIC;
use nofx_core::queue::StepReadyPayload;
use nofx_core::store::Store;
use nofx_core::tool::PolicyEnvelope;
use nofx_core::tool::ToolContext;
use nofx_core::tool::ToolOutcome;
use nofx_tools::ToolRegistry;
use serde_json::Value;
use serde_json::json;
use tracing::Instrument;
use tracing::info_span;
use tracing::warn;

/// Default handler timeout (§6, `STEP_TIMEOUT_MS` default).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

/// Executes steps against a `Store` and a `ToolRegistry` (§4.D). Holds no
/// queue reference: advancing the plan writes an outbox row rather than
/// enqueuing directly, so the outbox relay remains the single path by which
/// a recorded state transition becomes a visible queue effect (§4.C).
pub struct StepRunner {
    store: Arc<dyn Store>,
    tools: Arc<ToolRegistry>,
    step_timeout: Duration,
}

impl StepRunner {
    /// Creates a runner bound to `store` and `tools`, with the given handler
    /// timeout.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, tools: Arc<ToolRegistry>, step_timeout: Duration) -> Self {
        Self { store, tools, step_timeout }
    }

    /// Runs one step to a terminal (or no-op) outcome (§4.D). `attempt` is
    /// the 1-based delivery count, threaded into `ToolContext` and the
    /// ambient observability span.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the step or run does not exist, or
    /// [`CoreError::Transient`] on store I/O failure. Handler-level failures
    /// are captured as a `failed` step, not propagated as an `Err`.
    pub async fn run_step(&self, run_id: &RunId, step_id: &StepId, attempt: u32) -> Result<(), CoreError> {
        let span = info_span!("run_step", run_id = %run_id, step_id = %step_id, attempt);
        self.run_step_inner(run_id, step_id, attempt).instrument(span).await
    }

    async fn run_step_inner(&self, run_id: &RunId, step_id: &StepId, attempt: u32) -> Result<(), CoreError> {
        let lock = self.store.lock_run(run_id).await?;
        let result = self.run_step_locked(run_id, step_id, attempt).await;
        drop(lock);
        result
    }

    async fn run_step_locked(&self, run_id: &RunId, step_id: &StepId, attempt: u32) -> Result<(), CoreError> {
        let Some(mut step) = self.store.get_step(run_id, step_id).await? else {
            return Err(CoreError::NotFound(format!("step {step_id} not found in run {run_id}")));
        };
        if step.status.is_terminal() {
            return Ok(());
        }

        let Some(mut run) = self.store.get_run(run_id).await? else {
            return Err(CoreError::NotFound(format!("run {run_id} not found")));
        };
        if run.status == RunStatus::Queued {
            run.transition_running();
            self.store.update_run(&run).await?;
            self.store.record_event(run_id, EventType::RunStarted, json!({}), None).await?;
        }

        if let Some(policy) = PolicyEnvelope::from_inputs(&step.inputs) {
            if !policy.allows_tool(&step.tool) {
                step.transition_terminal(
                    StepStatus::Failed,
                    Some(json!({
                        "error": "policy: tool not allowed",
                        "tool": step.tool,
                        "toolsAllowed": policy.tools_allowed,
                    })),
                );
                self.store.update_step(&step).await?;
                self.store
                    .record_event(
                        run_id,
                        EventType::StepPolicyDenied,
                        json!({ "stepId": step_id, "tool": step.tool }),
                        Some(step_id.clone()),
                    )
                    .await?;
                self.cancel_siblings(run_id, step_id).await?;
                return self.finish(run_id).await;
            }
        }

        step.transition_running();
        self.store.update_step(&step).await?;
        self.store.record_event(run_id, EventType::StepStarted, json!({}), Some(step_id.clone())).await?;

        let Some(handler) = self.tools.get(&step.tool) else {
            step.transition_terminal(StepStatus::Failed, Some(json!({ "error": "no handler", "tool": step.tool })));
            self.store.update_step(&step).await?;
            self.store
                .record_event(
                    run_id,
                    EventType::StepFailed,
                    json!({ "error": "no handler", "tool": step.tool }),
                    Some(step_id.clone()),
                )
                .await?;
            self.cancel_siblings(run_id, step_id).await?;
            return self.finish(run_id).await;
        };

        let ctx = ToolContext { run_id: run_id.clone(), step_id: step_id.clone(), attempt };
        match tokio::time::timeout(self.step_timeout, handler.run(&step, &ctx)).await {
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(self.step_timeout.as_millis()).unwrap_or(u64::MAX);
                self.mark_step_timed_out(run_id, &mut step, timeout_ms).await?;
            }
            Ok(Err(tool_error)) => {
                step.transition_terminal(StepStatus::Failed, Some(json!({ "error": tool_error.0 })));
                self.store.update_step(&step).await?;
                self.store
                    .record_event(
                        run_id,
                        EventType::StepFailed,
                        step.outputs.clone().unwrap_or(Value::Null),
                        Some(step_id.clone()),
                    )
                    .await?;
            }
            Ok(Ok(outcome)) => {
                self.apply_outcome(run_id, step_id, &mut step, outcome).await?;
            }
        }

        if matches!(step.status, StepStatus::Failed | StepStatus::TimedOut) {
            self.cancel_siblings(run_id, step_id).await?;
        } else if step.status == StepStatus::Succeeded {
            self.advance_plan(run_id, step_id).await?;
        }

        self.finish(run_id).await
    }

    async fn apply_outcome(
        &self,
        run_id: &RunId,
        step_id: &StepId,
        step: &mut Step,
        outcome: ToolOutcome,
    ) -> Result<(), CoreError> {
        step.transition_terminal(StepStatus::Succeeded, outcome.outputs.clone());
        self.store.update_step(step).await?;
        self.store
            .record_event(
                run_id,
                EventType::StepSucceeded,
                outcome.outputs.clone().unwrap_or(Value::Null),
                Some(step_id.clone()),
            )
            .await?;
        for artifact in outcome.artifacts {
            self.store.add_artifact(run_id, step_id, &artifact.name, artifact.kind, artifact.bytes).await?;
        }
        for gate in outcome.gates {
            let created = self.store.create_or_get_gate(run_id, &gate.gate_type).await?;
            self.store.update_gate(&created.id, gate.status).await?;
        }
        Ok(())
    }

    /// Marks a step `timed_out` (§4.D `markStepTimedOut`), preserving prior
    /// outputs per the `{ value }` coercion rule and recording `step.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on store I/O failure.
    pub async fn mark_step_timed_out(&self, run_id: &RunId, step: &mut Step, timeout_ms: u64) -> Result<(), CoreError> {
        let mut merged = coerce_outputs_to_object(step.outputs.clone());
        merged.insert("error".to_string(), json!("timeout"));
        merged.insert("timeoutMs".to_string(), json!(timeout_ms));
        step.transition_terminal(StepStatus::TimedOut, Some(Value::Object(merged)));
        self.store.update_step(step).await?;
        self.store
            .record_event(
                run_id,
                EventType::StepTimeout,
                json!({ "stepId": step.id, "timeoutMs": timeout_ms }),
                Some(step.id.clone()),
            )
            .await?;
        Ok(())
    }

    /// Cancels every non-terminal sibling of `just_finished` in `run_id`'s
    /// plan. A step that never started is walked through `running` first so
    /// invariant 2 still holds once it lands on `cancelled`.
    async fn cancel_siblings(&self, run_id: &RunId, just_finished: &StepId) -> Result<(), CoreError> {
        let siblings = self.store.list_steps(run_id).await?;
        for mut sibling in siblings {
            if &sibling.id == just_finished || sibling.status.is_terminal() {
                continue;
            }
            if sibling.started_at.is_none() {
                sibling.transition_running();
            }
            sibling.transition_terminal(StepStatus::Cancelled, None);
            self.store.update_step(&sibling).await?;
        }
        Ok(())
    }

    /// Enqueues the next `pending` step of the plan, in plan order, via the
    /// outbox rather than the queue directly (§4.C).
    async fn advance_plan(&self, run_id: &RunId, just_finished: &StepId) -> Result<(), CoreError> {
        let siblings = self.store.list_steps(run_id).await?;
        let Some(next) = siblings.iter().find(|candidate| &candidate.id != just_finished && candidate.status == StepStatus::Pending) else {
            return Ok(());
        };
        let mut next = next.clone();
        next.status = StepStatus::Queued;
        self.store.update_step(&next).await?;
        let payload = StepReadyPayload { run_id: run_id.clone(), step_id: next.id.clone(), attempt: None };
        let payload_json = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
        if let Err(err) = self.store.outbox_add(STEP_READY_TOPIC, payload_json).await {
            warn!(run_id = %run_id, step_id = %next.id, error = %err, "failed to schedule next step, it will be picked up by recovery");
        }
        Ok(())
    }

    /// Finalises the run once `countRemainingSteps` reaches zero (§4.D step
    /// 9). A no-op if steps remain or the run is already terminal.
    async fn finish(&self, run_id: &RunId) -> Result<(), CoreError> {
        if self.store.count_remaining_steps(run_id).await? > 0 {
            return Ok(());
        }
        let Some(mut run) = self.store.get_run(run_id).await? else {
            return Ok(());
        };
        if run.status.is_terminal() {
            return Ok(());
        }
        let steps = self.store.list_steps(run_id).await?;
        let any_failed = steps.iter().any(|step| matches!(step.status, StepStatus::Failed | StepStatus::TimedOut));
        if any_failed {
            run.transition_terminal(RunStatus::Failed);
            self.store.update_run(&run).await?;
            self.store.record_event(run_id, EventType::RunFailed, json!({}), None).await?;
        } else {
            run.transition_terminal(RunStatus::Succeeded);
            self.store.update_run(&run).await?;
            self.store.record_event(run_id, EventType::RunSucceeded, json!({}), None).await?;
        }
        Ok(())
    }
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

    async fn fixture() -> (Arc<FsStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsStore::open(dir.path().to_path_buf()).await.expect("open store"));
        (store, dir)
    }

    fn single_step_plan(tool: &str, inputs: Value) -> Plan {
        Plan { goal: "hello".into(), steps: vec![PlanStep { name: "s1".into(), tool: tool.into(), inputs }], metadata: None }
    }

    #[tokio::test]
    async fn s1_echo_plan_succeeds_end_to_end() {
        let (store, _dir) = fixture().await;
        let plan = single_step_plan("echo", json!({ "text": "hi" }));
        let run = store.create_run(ProjectId::new("p1"), plan.clone()).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "echo", json!({ "text": "hi" })).await.expect("create step");
        store.update_step(&{ let mut s = step.clone(); s.status = StepStatus::Queued; s }).await.expect("queue step");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = StepRunner::new(store.clone(), tools, Duration::from_millis(500));
        runner.run_step(&run.id, &step.id, 1).await.expect("run step");

        let run = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run.status, RunStatus::Succeeded);
        let finished = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(finished.status, StepStatus::Succeeded);
        assert_eq!(finished.outputs, Some(json!({ "text": "hi" })));
    }

    #[tokio::test]
    async fn s2_failing_handler_fails_the_run() {
        let (store, _dir) = fixture().await;
        let plan = single_step_plan("fail", json!({ "message": "boom" }));
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "fail", json!({ "message": "boom" })).await.expect("create step");
        store.update_step(&{ let mut s = step.clone(); s.status = StepStatus::Queued; s }).await.expect("queue step");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = StepRunner::new(store.clone(), tools, Duration::from_millis(500));
        runner.run_step(&run.id, &step.id, 1).await.expect("run step");

        let run = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run.status, RunStatus::Failed);
        let finished = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(finished.status, StepStatus::Failed);
        assert_eq!(finished.outputs, Some(json!({ "error": "boom" })));
    }

    #[tokio::test]
    async fn s3_slow_handler_times_out() {
        let (store, _dir) = fixture().await;
        let plan = single_step_plan("slow", json!({ "sleep_ms": 400 }));
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "slow", json!({ "sleep_ms": 400 })).await.expect("create step");
        store.update_step(&{ let mut s = step.clone(); s.status = StepStatus::Queued; s }).await.expect("queue step");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = StepRunner::new(store.clone(), tools, Duration::from_millis(100));
        runner.run_step(&run.id, &step.id, 1).await.expect("run step");

        let finished = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(finished.status, StepStatus::TimedOut);
        let outputs = finished.outputs.expect("outputs set");
        assert_eq!(outputs["error"], json!("timeout"));
        assert_eq!(outputs["timeoutMs"], json!(100));
        let run = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn s5_policy_denial_skips_the_handler() {
        let (store, _dir) = fixture().await;
        let inputs = json!({ "_policy": { "tools_allowed": ["bash"] } });
        let plan = single_step_plan("web:fetch", inputs.clone());
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let step = store.create_step(&run.id, "s1", "web:fetch", inputs).await.expect("create step");
        store.update_step(&{ let mut s = step.clone(); s.status = StepStatus::Queued; s }).await.expect("queue step");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = StepRunner::new(store.clone(), tools, Duration::from_millis(500));
        runner.run_step(&run.id, &step.id, 1).await.expect("run step");

        let finished = store.get_step(&run.id, &step.id).await.expect("get step").expect("step exists");
        assert_eq!(finished.status, StepStatus::Failed);
        let outputs = finished.outputs.expect("outputs set");
        assert_eq!(outputs["error"], json!("policy: tool not allowed"));
        assert_eq!(outputs["tool"], json!("web:fetch"));
        let events = store.list_events(&run.id).await.expect("events");
        assert!(events.iter().any(|e| e.event_type == EventType::StepPolicyDenied));
    }

    #[tokio::test]
    async fn multi_step_plan_advances_sequentially() {
        let (store, _dir) = fixture().await;
        let plan = Plan {
            goal: "hello".into(),
            steps: vec![
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({ "n": 1 }) },
                PlanStep { name: "s2".into(), tool: "echo".into(), inputs: json!({ "n": 2 }) },
            ],
            metadata: None,
        };
        let run = store.create_run(ProjectId::new("p1"), plan).await.expect("create run");
        let s1 = store.create_step(&run.id, "s1", "echo", json!({ "n": 1 })).await.expect("create s1");
        let s2 = store.create_step(&run.id, "s2", "echo", json!({ "n": 2 })).await.expect("create s2");
        store.update_step(&{ let mut s = s1.clone(); s.status = StepStatus::Queued; s }).await.expect("queue s1");

        let tools = Arc::new(ToolRegistry::with_builtin_handlers());
        let runner = StepRunner::new(store.clone(), tools, Duration::from_millis(500));
        runner.run_step(&run.id, &s1.id, 1).await.expect("run s1");

        let run_after_s1 = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run_after_s1.status, RunStatus::Running);
        let s2_after = store.get_step(&run.id, &s2.id).await.expect("get s2").expect("s2 exists");
        assert_eq!(s2_after.status, StepStatus::Queued);
        let unsent = store.outbox_list_unsent(10).await.expect("outbox");
        assert!(unsent.iter().any(|row| row.topic == nofx_core::queue::STEP_READY_TOPIC));

        runner.run_step(&run.id, &s2.id, 1).await.expect("run s2");
        let run_after_s2 = store.get_run(&run.id).await.expect("get run").expect("run exists");
        assert_eq!(run_after_s2.status, RunStatus::Succeeded);
    }
}
