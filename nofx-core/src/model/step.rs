// nofx-core/src/model/step.rs
// ============================================================================
// Module: Step
// Description: The Step entity and its status state machine (§3, §4.D).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::InboxKey;
use crate::ids::RunId;
use crate::ids::StepId;
use crate::time::Timestamp;

/// The sidecar key step inputs carry the policy envelope under (§4.D, §9 Open
/// Question: `_policy` is a sidecar field of `inputs`, excluded from the
/// idempotency hash and never copied into outputs).
pub const POLICY_SIDECAR_KEY: &str = "_policy";

/// Step status. `pending --enqueue--> queued --claim--> running
/// --{succeed | fail | timeout}--> terminal`; additionally `queued --cancel-->
/// cancelled`, and Recovery may go `{failed | timed_out | cancelled}
/// --retry--> queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Materialised from the plan, not yet enqueued.
    Pending,
    /// On the queue, waiting to be claimed.
    Queued,
    /// Claimed by a worker, handler executing.
    Running,
    /// Handler returned successfully.
    Succeeded,
    /// Handler raised, or the step was denied by policy.
    Failed,
    /// Handler did not return within the step timeout.
    TimedOut,
    /// Administratively cancelled.
    Cancelled,
}

impl StepStatus {
    /// Terminal statuses per §3: `{succeeded, failed, timed_out, cancelled}`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled)
    }

    /// Statuses `retryStep` (§4.E) accepts: `{failed, timed_out, cancelled}`.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Cancelled)
    }
}

/// A step: an individually addressable unit of work bound to one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier.
    pub id: StepId,
    /// Owning run.
    pub run_id: RunId,
    /// Step name, unique within its run's plan.
    pub name: String,
    /// Tool name, resolved against the tool registry.
    pub tool: String,
    /// Inputs, including the `_policy` sidecar if present.
    pub inputs: Value,
    /// Current status.
    pub status: StepStatus,
    /// Set when the step transitions to `running`.
    pub started_at: Option<Timestamp>,
    /// Set exactly when the step reaches a terminal status.
    pub ended_at: Option<Timestamp>,
    /// Handler outputs, or an `{ error }` shape on failure/timeout.
    pub outputs: Option<Value>,
    /// Idempotency key in effect for the current (non-terminal) attempt.
    pub idempotency_key: Option<InboxKey>,
    /// Count of attempts started so far (§4.E, §6 `__attempt`): incremented
    /// each time [`Step::transition_running`] runs, so it always reflects
    /// the number of times this step has been handed to a worker, across
    /// retries and process restarts alike.
    pub attempts: u32,
}

impl Step {
    /// Creates a new step in `pending` status.
    #[must_use]
    pub fn new(id: StepId, run_id: RunId, name: impl Into<String>, tool: impl Into<String>, inputs: Value) -> Self {
        Self {
            id,
            run_id,
            name: name.into(),
            tool: tool.into(),
            inputs,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            outputs: None,
            idempotency_key: None,
            attempts: 0,
        }
    }

    /// Returns `inputs` with the `_policy` sidecar key removed, as used for the
    /// natural idempotency key hash (§4.E) and for anything handed to a tool
    /// handler that must not see its own policy envelope.
    #[must_use]
    pub fn inputs_without_policy(&self) -> Value {
        match &self.inputs {
            Value::Object(map) => {
                let mut stripped = map.clone();
                stripped.remove(POLICY_SIDECAR_KEY);
                Value::Object(stripped)
            }
            other => other.clone(),
        }
    }

    /// Transitions to `running`, setting `started_at` and incrementing
    /// `attempts`.
    pub fn transition_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Timestamp::now());
        self.attempts += 1;
    }

    /// Transitions to a terminal status, setting `ended_at` and `outputs`.
    pub fn transition_terminal(&mut self, status: StepStatus, outputs: Option<Value>) {
        debug_assert!(status.is_terminal(), "transition_terminal called with a non-terminal status");
        self.status = status;
        self.ended_at = Some(Timestamp::now());
        self.outputs = outputs;
    }

    /// Resets a terminal step back to `queued` for retry (§4.E): clears
    /// `ended_at` and `outputs`, leaves `started_at` as a historical record of
    /// the prior attempt until the next `transition_running` overwrites it.
    pub fn transition_retry(&mut self) {
        self.status = StepStatus::Queued;
        self.ended_at = None;
        self.outputs = None;
    }
}

/// Coerces a possibly-non-object "previous outputs" value into an object,
/// wrapping non-object values under a single `value` key, per §4.D's tie-break
/// rule for `markStepTimedOut` preserving prior outputs. Preserves key order of
/// an existing object.
#[must_use]
pub fn coerce_outputs_to_object(previous: Option<Value>) -> serde_json::Map<String, Value> {
    match previous {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = serde_json::Map::with_capacity(1);
            map.insert("value".to_string(), other);
            map
        }
        None => serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_without_policy_strips_sidecar_only() {
        let step = Step::new(
            StepId::new("s1"),
            RunId::new("r1"),
            "s1",
            "echo",
            json!({ "text": "hi", "_policy": { "tools_allowed": ["echo"] } }),
        );
        let stripped = step.inputs_without_policy();
        assert_eq!(stripped, json!({ "text": "hi" }));
    }

    #[test]
    fn coerce_outputs_wraps_scalars() {
        let coerced = coerce_outputs_to_object(Some(json!(42)));
        assert_eq!(coerced.get("value"), Some(&json!(42)));
        let coerced_array = coerce_outputs_to_object(Some(json!([1, 2])));
        assert_eq!(coerced_array.get("value"), Some(&json!([1, 2])));
        let coerced_none = coerce_outputs_to_object(None);
        assert!(coerced_none.is_empty());
    }

    #[test]
    fn coerce_outputs_preserves_object_keys() {
        let coerced = coerce_outputs_to_object(Some(json!({ "a": 1, "b": 2 })));
        let keys: Vec<_> = coerced.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn retry_clears_ended_at_and_outputs() {
        let mut step = Step::new(StepId::new("s1"), RunId::new("r1"), "s1", "echo", json!({}));
        step.transition_terminal(StepStatus::Failed, Some(json!({ "error": "boom" })));
        step.transition_retry();
        assert_eq!(step.status, StepStatus::Queued);
        assert!(step.ended_at.is_none());
        assert!(step.outputs.is_none());
    }
}
