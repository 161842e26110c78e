// nofx-tools/src/handlers/fail.rs
// ============================================================================
// Module: Fail Handler
// Description: Raises a configurable error (§8 scenarios S2, S6).
// ============================================================================

use async_trait::async_trait;
use nofx_core::model::Step;
use nofx_core::tool::ToolContext;
use nofx_core::tool::ToolError;
use nofx_core::tool::ToolHandler;
use nofx_core::tool::ToolOutcome;

/// Registered as `fail`. Reads `inputs.message` (default `"boom"`, matching
/// §8 S2) and `inputs.fail_until_attempt` (default: never succeeds). Raises
/// [`ToolError`] while `ctx.attempt <= fail_until_attempt`, succeeds
/// otherwise — used to model §8 S6's "fails N times then succeeds" without
/// handler-internal mutable state, since `ctx.attempt` already tracks the
/// queue-driven redelivery count.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailHandler;

#[async_trait]
impl ToolHandler for FailHandler {
    async fn run(&self, step: &Step, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let message = step.inputs.get("message").and_then(|v| v.as_str()).unwrap_or("boom").to_string();
        let fail_until_attempt = step.inputs.get("fail_until_attempt").and_then(serde_json::Value::as_u64);
        match fail_until_attempt {
            Some(limit) if u64::from(ctx.attempt) > limit => {
                Ok(ToolOutcome { outputs: Some(serde_json::json!({ "recovered_at_attempt": ctx.attempt })), ..ToolOutcome::default() })
            }
            _ => Err(ToolError::new(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use nofx_core::ids::RunId;
    use nofx_core::ids::StepId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn fails_with_configured_message_by_default() {
        let step = Step::new(StepId::new("s1"), RunId::new("r1"), "s1", "fail", json!({}));
        let ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 1 };
        let err = FailHandler.run(&step, &ctx).await.expect_err("fail handler always fails by default");
        assert_eq!(err.0, "boom");
    }

    #[tokio::test]
    async fn succeeds_once_attempt_passes_fail_until_attempt() {
        let step = Step::new(
            StepId::new("s1"),
            RunId::new("r1"),
            "s1",
            "fail",
            json!({ "fail_until_attempt": 5 }),
        );
        let failing_ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 5 };
        assert!(FailHandler.run(&step, &failing_ctx).await.is_err());

        let succeeding_ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 6 };
        assert!(FailHandler.run(&step, &succeeding_ctx).await.is_ok());
    }
}
