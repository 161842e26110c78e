// nofx-tools/src/handlers/sleep.rs
// ============================================================================
// Module: Sleep Handler
// Description: Sleeps for a configured duration, used to exercise the step
// timeout path (§8 scenario S3).
// ============================================================================

use async_trait::async_trait;
use nofx_core::model::Step;
use nofx_core::tool::ToolContext;
use nofx_core::tool::ToolError;
use nofx_core::tool::ToolHandler;
use nofx_core::tool::ToolOutcome;

/// Registered as `slow`. Sleeps for `inputs.sleep_ms` (default 0). A
/// cooperative handler: the sleep itself is an `.await` point the runner's
/// timeout can cancel at.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepHandler;

#[async_trait]
impl ToolHandler for SleepHandler {
    async fn run(&self, step: &Step, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let sleep_ms = step.inputs.get("sleep_ms").and_then(serde_json::Value::as_u64).unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
        Ok(ToolOutcome { outputs: Some(serde_json::json!({ "slept_ms": sleep_ms })), ..ToolOutcome::default() })
    }
}

#[cfg(test)]
mod tests {
    use nofx_core::ids::RunId;
    use nofx_core::ids::StepId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn reports_slept_duration() {
        let step = Step::new(StepId::new("s1"), RunId::new("r1"), "s1", "slow", json!({ "sleep_ms": 5 }));
        let ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 1 };
        let outcome = SleepHandler.run(&step, &ctx).await.expect("sleep succeeds");
        assert_eq!(outcome.outputs, Some(json!({ "slept_ms": 5 })));
    }
}
