// nofx-tools/src/handlers/gate.rs
// ============================================================================
// Module: Gate Handler
// Description: Handles `gate:<type>` steps, creating-or-getting and updating
// the named gate (§3, §4.D step 8).
// ============================================================================

use async_trait::async_trait;
use nofx_core::model::GateStatus;
use nofx_core::model::Step;
use nofx_core::tool::ToolContext;
use nofx_core::tool::ToolError;
use nofx_core::tool::ToolGateUpdate;
use nofx_core::tool::ToolHandler;
use nofx_core::tool::ToolOutcome;

/// Registered under each concrete `gate:<type>` tool name. Derives the gate
/// type from the tool name's suffix and the target status from
/// `inputs.status` (default `passed`).
#[derive(Debug, Default, Clone, Copy)]
pub struct GateHandler;

impl GateHandler {
    /// The `<type>` part of a `gate:<type>` tool name, or the tool name
    /// itself if it carries no `gate:` prefix.
    #[must_use]
    pub fn gate_type(tool: &str) -> &str {
        tool.strip_prefix("gate:").unwrap_or(tool)
    }
}

#[async_trait]
impl ToolHandler for GateHandler {
    async fn run(&self, step: &Step, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let status = match step.inputs.get("status").and_then(serde_json::Value::as_str) {
            Some("passed") | None => GateStatus::Passed,
            Some("failed") => GateStatus::Failed,
            Some("waived") => GateStatus::Waived,
            Some("pending") => GateStatus::Pending,
            Some(other) => return Err(ToolError::new(format!("unknown gate status '{other}'"))),
        };
        let gate_type = Self::gate_type(&step.tool).to_string();
        Ok(ToolOutcome {
            outputs: Some(serde_json::json!({ "gateType": gate_type, "status": status })),
            artifacts: vec![],
            gates: vec![ToolGateUpdate { gate_type, status }],
        })
    }
}

#[cfg(test)]
mod tests {
    use nofx_core::ids::RunId;
    use nofx_core::ids::StepId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn derives_gate_type_from_tool_suffix_and_defaults_to_passed() {
        let step = Step::new(StepId::new("s1"), RunId::new("r1"), "s1", "gate:security-review", json!({}));
        let ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 1 };
        let outcome = GateHandler.run(&step, &ctx).await.expect("gate succeeds");
        assert_eq!(outcome.gates.len(), 1);
        assert_eq!(outcome.gates[0].gate_type, "security-review");
        assert_eq!(outcome.gates[0].status, GateStatus::Passed);
    }

    #[tokio::test]
    async fn rejects_unknown_status() {
        let step =
            Step::new(StepId::new("s1"), RunId::new("r1"), "s1", "gate:qa", json!({ "status": "bogus" }));
        let ctx = ToolContext { run_id: RunId::new("r1"), step_id: StepId::new("s1"), attempt: 1 };
        assert!(GateHandler.run(&step, &ctx).await.is_err());
    }
}
