// nofx-tools/src/handlers/echo.rs
// ============================================================================
// Module: Echo Handler
// Description: Returns its inputs verbatim as outputs (§8 scenario S1).
// ============================================================================

use async_trait::async_trait;
use nofx_core::model::Step;
use nofx_core::tool::ToolContext;
use nofx_core::tool::ToolError;
use nofx_core::tool::ToolHandler;
use nofx_core::tool::ToolOutcome;

/// Registered as `echo`. Succeeds unconditionally, returning `step.inputs`
/// (minus the `_policy` sidecar) as `outputs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn run(&self, step: &Step, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome { outputs: Some(step.inputs_without_policy()), artifacts: vec![], gates: vec![] })
    }
}

#[cfg(test)]
mod tests {
    use nofx_core::ids::RunId;
    use nofx_core::ids::StepId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn echoes_inputs_without_policy_sidecar() {
        let step = Step::new(
            StepId::new("s1"),
            RunId::new("r1"),
            "s1",
            "echo",
            json!({ "text": "hi", "_policy": { "tools_allowed": ["echo"] } }),
        );
        let ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 1 };
        let outcome = EchoHandler.run(&step, &ctx).await.expect("echo succeeds");
        assert_eq!(outcome.outputs, Some(json!({ "text": "hi" })));
    }
}
