// nofx-runner/src/plan.rs
// ============================================================================
// Module: Plan Submission
// Description: Validates and materialises an incoming plan into a run and its
// steps, then schedules the first step (§4.D step 1, §6 "submit a plan").
// ============================================================================

//! Grounded on the teacher engine's `ControlPlane::start_run`: create the
//! aggregate, persist it, dispatch only the work the first stage needs, and
//! let later stages be driven by subsequent events rather than dispatched
//! up front. Here the "aggregate" is the run plus all of its steps
//! (materialised `pending` in one pass), and "the first stage's work" is
//! queuing exactly the first step.

use std::sync::Arc;

use nofx_core::errors::CoreError;
use nofx_core::ids::ProjectId;
use nofx_core::model::EventType;
use nofx_core::model::Plan;
use nofx_core::model::Run;
use nofx_core::model::StepStatus;
use nofx_core::queue::STEP_READY_TOPIC;
use nofx_core::queue::StepReadyPayload;
use nofx_core::store::Store;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Failure modes of [`submit_plan`].
#[derive(Debug, Error)]
pub enum SubmitPlanError {
    /// The plan failed structural validation (§6): empty step list,
    /// duplicate step names, non-object inputs.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Validates `plan`, creates the owning run, materialises every step as
/// `pending`, and queues the first step for execution (§4.D step 1).
///
/// # Errors
///
/// Returns [`SubmitPlanError::InvalidPlan`] if `plan` fails structural
/// validation, or [`SubmitPlanError::Store`] on store I/O failure.
pub async fn submit_plan(store: &Arc<dyn Store>, project_id: ProjectId, plan: Plan) -> Result<Run, SubmitPlanError> {
    plan.validate_structure().map_err(SubmitPlanError::InvalidPlan)?;

    let run = store.create_run(project_id, plan.clone()).await?;
    store.record_event(&run.id, EventType::RunCreated, json!({ "goal": run.plan.goal }), None).await?;

    let mut created = Vec::with_capacity(plan.steps.len());
    for plan_step in &plan.steps {
        let step = store.create_step(&run.id, &plan_step.name, &plan_step.tool, plan_step.inputs.clone()).await?;
        created.push(step);
    }

    if let Some(first) = created.first() {
        let mut first = first.clone();
        first.status = StepStatus::Queued;
        store.update_step(&first).await?;
        let payload = StepReadyPayload { run_id: run.id.clone(), step_id: first.id.clone(), attempt: None };
        let payload_json = serde_json::to_value(&payload).unwrap_or_else(|_| json!({}));
        if let Err(err) = store.outbox_add(STEP_READY_TOPIC, payload_json).await {
            warn!(run_id = %run.id, step_id = %first.id, error = %err, "failed to schedule first step, it will be picked up by recovery");
        }
    }

    Ok(run)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nofx_core::model::PlanStep;
    use nofx_core::model::RunStatus;
    use nofx_core::model::StepStatus;
    use nofx_store_fs::FsStore;
    use serde_json::json;

    use super::*;

    async fn store() -> (Arc<dyn Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path().to_path_buf()).await.expect("open store");
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn materialises_every_step_and_queues_only_the_first() {
        let (store, _dir) = store().await;
        let plan = Plan {
            goal: "hello".into(),
            steps: vec![
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({ "n": 1 }) },
                PlanStep { name: "s2".into(), tool: "echo".into(), inputs: json!({ "n": 2 }) },
            ],
            metadata: None,
        };
        let run = submit_plan(&store, ProjectId::new("p1"), plan).await.expect("submit plan");
        assert_eq!(run.status, RunStatus::Queued);

        let steps = store.list_steps(&run.id).await.expect("list steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepStatus::Queued);
        assert_eq!(steps[1].status, StepStatus::Pending);

        let unsent = store.outbox_list_unsent(10).await.expect("outbox");
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].topic, nofx_core::queue::STEP_READY_TOPIC);

        let events = store.list_events(&run.id).await.expect("events");
        assert!(events.iter().any(|e| e.event_type == EventType::RunCreated));
    }

    #[tokio::test]
    async fn rejects_structurally_invalid_plans() {
        let (store, _dir) = store().await;
        let plan = Plan { goal: "hello".into(), steps: vec![], metadata: None };
        let err = submit_plan(&store, ProjectId::new("p1"), plan).await.expect_err("empty plan rejected");
        assert!(matches!(err, SubmitPlanError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_step_names() {
        let (store, _dir) = store().await;
        let plan = Plan {
            goal: "hello".into(),
            steps: vec![
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({}) },
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({}) },
            ],
            metadata: None,
        };
        let err = submit_plan(&store, ProjectId::new("p1"), plan).await.expect_err("duplicate names rejected");
        assert!(matches!(err, SubmitPlanError::InvalidPlan(_)));
    }
}
