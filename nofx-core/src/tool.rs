// nofx-core/src/tool.rs
// ============================================================================
// Module: Tool
// Description: ToolHandler capability trait, policy envelope, and handler
// outcome/result types (§4.F, §4.D).
// ============================================================================

//! A tool handler is a stateless, polymorphic object conforming to
//! `run(step, context) -> result`. Concrete handlers (code generation, git PR,
//! workspace write) are out of scope (§1); this module only defines the
//! capability boundary they implement against.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::ids::RunId;
use crate::ids::StepId;
use crate::model::ArtifactKind;
use crate::model::GateStatus;
use crate::model::Step;
use crate::model::step::POLICY_SIDECAR_KEY;

/// The per-step constraints enforced before handler execution (§4.D): allowed
/// tools, allowed environment variables, and the secrets scope a handler may
/// read from. Lives at `step.inputs._policy` as a sidecar, excluded from the
/// idempotency hash and never copied into outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyEnvelope {
    /// Tool names this step is permitted to invoke. An empty list denies all
    /// tools (fail closed); callers that want "allow everything" must say so
    /// explicitly rather than relying on an empty-means-allow default.
    #[serde(default)]
    pub tools_allowed: Vec<String>,
    /// Environment variable names a handler may read.
    #[serde(default)]
    pub env_allowed: Vec<String>,
    /// Secret scopes a handler may access.
    #[serde(default)]
    pub secrets_scope: Vec<String>,
}

impl PolicyEnvelope {
    /// Extracts the policy envelope from a step's raw `inputs`, if present.
    #[must_use]
    pub fn from_inputs(inputs: &Value) -> Option<Self> {
        inputs.get(POLICY_SIDECAR_KEY).and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Whether `tool` is in `tools_allowed`.
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools_allowed.iter().any(|allowed| allowed == tool)
    }
}

/// Ambient context handed to a tool handler alongside the step it's executing.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Owning run.
    pub run_id: RunId,
    /// Step being executed.
    pub step_id: StepId,
    /// `1` on first attempt, incremented on each retry/redelivery.
    pub attempt: u32,
}

/// An artifact a handler wants persisted via `store.addArtifact`.
#[derive(Debug, Clone)]
pub struct ToolArtifact {
    /// Artifact name.
    pub name: String,
    /// Storage kind the caller prefers (the store may override based on config).
    pub kind: ArtifactKind,
    /// Raw artifact bytes.
    pub bytes: Vec<u8>,
}

/// A gate update a handler wants applied via `createOrGetGate` + `updateGate`.
#[derive(Debug, Clone)]
pub struct ToolGateUpdate {
    /// The `<type>` in `gate:<type>`.
    pub gate_type: String,
    /// Status to set.
    pub status: GateStatus,
}

/// What a tool handler produces on success.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Handler outputs, merged into `step.outputs` on success.
    pub outputs: Option<Value>,
    /// Artifacts to persist.
    pub artifacts: Vec<ToolArtifact>,
    /// Gate updates to apply.
    pub gates: Vec<ToolGateUpdate>,
}

/// Error raised by a tool handler. The runner never propagates this message
/// verbatim into outputs without it already being a sanitised, user-safe
/// string — handlers are expected to produce short human messages, not stack
/// traces (§7).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    /// Creates a new tool error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The capability one named operation implements.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the handler against a step's inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on handler failure; the runner converts this into
    /// a `step.failed` transition, never propagating handler internals.
    async fn run(&self, step: &Step, ctx: &ToolContext) -> Result<ToolOutcome, ToolError>;

    /// Optionally validates inputs before dispatch. Default accepts anything;
    /// handlers with a stricter input contract should override this.
    ///
    /// # Errors
    ///
    /// Returns a human-readable validation message on rejection.
    fn validate_inputs(&self, _inputs: &Value) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn policy_envelope_extraction_and_allow_check() {
        let inputs = json!({ "text": "hi", "_policy": { "tools_allowed": ["bash"] } });
        let policy = PolicyEnvelope::from_inputs(&inputs).expect("policy present");
        assert!(policy.allows_tool("bash"));
        assert!(!policy.allows_tool("web:fetch"));
    }

    #[test]
    fn missing_policy_returns_none() {
        let inputs = json!({ "text": "hi" });
        assert!(PolicyEnvelope::from_inputs(&inputs).is_none());
    }
}
