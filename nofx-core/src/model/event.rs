// nofx-core/src/model/event.rs
// ============================================================================
// Module: Event
// Description: The append-only Event log entity and stable event type names (§6).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::EventId;
use crate::ids::RunId;
use crate::ids::StepId;
use crate::time::Timestamp;

/// Maximum nesting depth a recorded event payload may have before sanitisation
/// truncates it (§4.C).
pub const MAX_EVENT_PAYLOAD_DEPTH: usize = 32;

/// Maximum serialised size, in bytes, a recorded event payload may have before
/// sanitisation truncates it (§4.C).
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 256 * 1024;

/// Stable event type names, used by downstream consumers (§6). Serializes as
/// the exact dotted strings the external interface names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// A run was created from a submitted plan.
    #[serde(rename = "run.created")]
    RunCreated,
    /// A run's first step started.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A run reached `succeeded`.
    #[serde(rename = "run.succeeded")]
    RunSucceeded,
    /// A run reached `failed`.
    #[serde(rename = "run.failed")]
    RunFailed,
    /// A run was resumed by recovery.
    #[serde(rename = "run.resumed")]
    RunResumed,
    /// A step transitioned to `running`.
    #[serde(rename = "step.started")]
    StepStarted,
    /// A step transitioned to `succeeded`.
    #[serde(rename = "step.succeeded")]
    StepSucceeded,
    /// A step transitioned to `failed`.
    #[serde(rename = "step.failed")]
    StepFailed,
    /// A step transitioned to `timed_out`.
    #[serde(rename = "step.timeout")]
    StepTimeout,
    /// A step was retried by recovery.
    #[serde(rename = "step.retry")]
    StepRetry,
    /// A step was failed by the policy envelope before handler dispatch.
    #[serde(rename = "step.policy_denied")]
    StepPolicyDenied,
    /// A producer attached a delay due to observed queue age.
    #[serde(rename = "queue.backpressure")]
    QueueBackpressure,
}

impl EventType {
    /// Returns the stable dotted name, matching the `#[serde(rename = ...)]`
    /// value exactly (used for outbox-row normalisation, which needs the raw
    /// string rather than a serialized JSON string literal).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunCreated => "run.created",
            Self::RunStarted => "run.started",
            Self::RunSucceeded => "run.succeeded",
            Self::RunFailed => "run.failed",
            Self::RunResumed => "run.resumed",
            Self::StepStarted => "step.started",
            Self::StepSucceeded => "step.succeeded",
            Self::StepFailed => "step.failed",
            Self::StepTimeout => "step.timeout",
            Self::StepRetry => "step.retry",
            Self::StepPolicyDenied => "step.policy_denied",
            Self::QueueBackpressure => "queue.backpressure",
        }
    }
}

/// An append-only event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Owning run.
    pub run_id: RunId,
    /// Associated step, if any.
    pub step_id: Option<StepId>,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Sanitised JSON payload.
    pub payload: Value,
    /// Creation time; events for a run are totally ordered by `(created_at, id)`.
    pub created_at: Timestamp,
}

/// Sanitises an event payload per §4.C: strips values that don't survive a JSON
/// round-trip (handled upstream by construction, since `Value` is always valid
/// JSON), enforces a max nesting depth, and enforces a max serialised size.
/// Over-depth or over-size payloads are replaced with a marker object carrying
/// `__truncated: true`.
#[must_use]
pub fn sanitize_event_payload(payload: Value) -> Value {
    if depth_of(&payload) > MAX_EVENT_PAYLOAD_DEPTH {
        return truncated_marker();
    }
    match serde_json::to_vec(&payload) {
        Ok(bytes) if bytes.len() > MAX_EVENT_PAYLOAD_BYTES => truncated_marker(),
        Ok(_) => payload,
        Err(_err) => truncated_marker(),
    }
}

fn truncated_marker() -> Value {
    serde_json::json!({ "__truncated": true })
}

fn depth_of(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_names_match_external_contract() {
        assert_eq!(EventType::RunCreated.as_str(), "run.created");
        assert_eq!(EventType::StepPolicyDenied.as_str(), "step.policy_denied");
        assert_eq!(serde_json::to_string(&EventType::StepTimeout).unwrap(), "\"step.timeout\"");
    }

    #[test]
    fn sanitize_passes_small_shallow_payloads_through() {
        let payload = json!({ "stepId": "s1", "timeoutMs": 100 });
        assert_eq!(sanitize_event_payload(payload.clone()), payload);
    }

    #[test]
    fn sanitize_truncates_over_deep_payloads() {
        let mut value = json!(1);
        for _ in 0..(MAX_EVENT_PAYLOAD_DEPTH + 5) {
            value = json!({ "nested": value });
        }
        let sanitized = sanitize_event_payload(value);
        assert_eq!(sanitized, json!({ "__truncated": true }));
    }

    #[test]
    fn sanitize_truncates_over_size_payloads() {
        let big = "x".repeat(MAX_EVENT_PAYLOAD_BYTES + 1);
        let sanitized = sanitize_event_payload(json!({ "blob": big }));
        assert_eq!(sanitized, json!({ "__truncated": true }));
    }
}
