// nofx-core/src/queue.rs
// ============================================================================
// Module: Queue
// Description: The topic-addressed work queue capability set of §4.B, plus
// the stable job payload shapes of §6.
// ============================================================================

//! Two drivers implement [`Queue`]: `nofx-queue::memory` (tests, single-box
//! mode) and `nofx-queue::durable` (a Redis-backed broker). Both apply the
//! same retry/backoff/DLQ policy, computed by `nofx-resilience`, so the
//! policy itself is not part of this trait — only the mechanics of moving a
//! job through waiting/active/delayed/DLQ states are.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CoreError;
use crate::ids::RunId;
use crate::ids::StepId;

/// Stable queue topic for step execution jobs (§6).
pub const STEP_READY_TOPIC: &str = "step.ready";

/// Stable queue topic the outbox relay republishes outbox-topic rows onto
/// (§4.C, §6).
pub const OUTBOX_TOPIC: &str = "outbox";

/// Returns the companion dead-letter topic name for `topic` (§6: `<topic>.dlq`).
#[must_use]
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

/// `step.ready` job payload (§6): `{ runId, stepId, __attempt? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReadyPayload {
    /// Owning run.
    pub run_id: RunId,
    /// Step to execute.
    pub step_id: StepId,
    /// Attempt counter, incremented on each retry/redelivery.
    #[serde(rename = "__attempt", default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// `outbox` job payload (§6): `{ runId, type, stepId?, payload? }`, the
/// normalised envelope the relay republishes for rows whose `topic` was
/// itself [`crate::model::OUTBOX_TOPIC`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEnvelope {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Stable event type name (§6).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Associated step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// Event payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Enqueue options (§4.B).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes ready for delivery.
    pub delay: Option<Duration>,
    /// Higher priority jobs are delivered first within a topic, ties broken
    /// by enqueue order.
    pub priority: Option<i32>,
    /// Overrides the default attempts budget (§4.B default = 5).
    pub attempts: Option<u32>,
}

/// Point-in-time counts for one topic (§4.B).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Jobs ready to be claimed.
    pub waiting: u64,
    /// Jobs currently claimed by a worker.
    pub active: u64,
    /// Jobs that reached a successful terminal state.
    pub completed: u64,
    /// Jobs that exhausted retries and moved to the DLQ.
    pub failed: u64,
    /// Jobs waiting for a future ready-time.
    pub delayed: u64,
    /// Whether the topic is currently paused (no new claims).
    pub paused: bool,
}

/// A dead-lettered job (§4.B `listDlq`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Original job payload.
    pub payload: Value,
    /// When the job was moved to the DLQ.
    pub failed_at: crate::time::Timestamp,
    /// The error from the final attempt.
    pub last_error: String,
    /// Attempts consumed before dead-lettering.
    pub attempts: u32,
}

/// A handler invoked once per delivered job. Implementations should be
/// idempotent-aware (see `nofx-core::idempotency`) since queue delivery is
/// at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes one job delivery.
    ///
    /// # Errors
    ///
    /// Returning `Err` causes the driver to apply retry/backoff policy;
    /// returning `Ok` acknowledges the job as done.
    async fn handle(&self, payload: Value) -> Result<(), CoreError>;
}

/// Topic-addressed job queue (§4.B).
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueues a job payload onto `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn enqueue(&self, topic: &str, payload: Value, options: EnqueueOptions) -> Result<(), CoreError>;

    /// Starts a long-running subscriber for `topic`. Returns once the
    /// subscription has been registered; delivery happens on background
    /// tasks the driver owns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the subscription cannot be
    /// established.
    async fn subscribe(&self, topic: &str, handler: std::sync::Arc<dyn JobHandler>) -> Result<(), CoreError>;

    /// Returns current counts for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn counts(&self, topic: &str) -> Result<QueueCounts, CoreError>;

    /// Returns the age, in milliseconds, of the oldest waiting job on `topic`,
    /// or `None` if the topic has no waiting jobs. Producers use this for the
    /// backpressure check in §4.B.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn oldest_waiting_age_ms(&self, topic: &str) -> Result<Option<u64>, CoreError>;

    /// Lists up to `limit` dead-lettered jobs for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn list_dlq(&self, topic: &str, limit: usize) -> Result<Vec<DlqEntry>, CoreError>;

    /// Re-enqueues up to `limit` DLQ jobs onto the live topic, resetting
    /// their attempt counter to 0 (§4.B). Returns the number re-enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn rehydrate_dlq(&self, topic: &str, limit: usize) -> Result<u64, CoreError>;
}
