// nofx-runner/src/relay.rs
// ============================================================================
// Module: Outbox Relay
// Description: Polls unsent outbox rows and republishes them onto the queue
// (§4.C, §4.C.1), the single mechanism by which a recorded state transition
// becomes a visible queue effect.
// ============================================================================

//! Grounded on the broker's own polling-relay idiom: wake on an interval, pull
//! a bounded batch of not-yet-delivered work, attempt delivery one row at a
//! time, and only mark a row done once delivery actually succeeds. A row
//! whose delivery attempt fails is left unsent and picked up again next tick
//! — the relay has no internal retry/backoff of its own because re-polling
//! on the next interval already provides it.

use std::sync::Arc;
use std::time::Duration;

use nofx_core::model::OutboxRow;
use nofx_core::model::OUTBOX_TOPIC;
use nofx_core::queue::OutboxEnvelope;
use nofx_core::queue::EnqueueOptions;
use nofx_core::queue::Queue;
use nofx_core::store::Store;
use serde_json::Value;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info_span;
use tracing::warn;
use tracing::Instrument;

/// Default relay poll interval (§4.C, §6 `OUTBOX_RELAY_INTERVAL_MS`).
pub const DEFAULT_RELAY_INTERVAL_MS: u64 = 1000;

/// Default relay batch size (§4.C, §6 `OUTBOX_RELAY_BATCH`).
pub const DEFAULT_RELAY_BATCH: usize = 25;

/// Polls `store`'s outbox and republishes unsent rows onto `queue` (§4.C).
pub struct OutboxRelay {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    interval: Duration,
    batch: usize,
}

impl OutboxRelay {
    /// Creates a relay polling every `interval`, pulling up to `batch` unsent
    /// rows per tick.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Queue>, interval: Duration, batch: usize) -> Self {
        Self { store, queue, interval, batch }
    }

    /// Runs the relay loop forever. Intended to be driven by
    /// [`spawn_outbox_relay`]; exposed separately so callers that manage
    /// their own task lifecycle can await it directly.
    pub async fn run(&self) -> ! {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let span = info_span!("outbox_relay");
            self.tick().instrument(span).await;
        }
    }

    /// Runs one poll-and-republish pass. Public so tests can drive the relay
    /// deterministically instead of racing a background task against an
    /// interval timer.
    pub async fn tick(&self) {
        let rows = match self.store.outbox_list_unsent(self.batch).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "failed to list unsent outbox rows");
                return;
            }
        };
        for row in rows {
            if self.relay_one(&row).await {
                if let Err(err) = self.store.outbox_mark_sent(&row.id).await {
                    warn!(outbox_id = %row.id, error = %err, "failed to mark outbox row sent, it will be redelivered");
                }
            }
        }
    }

    /// Attempts to deliver one row. Returns whether it should be marked sent.
    async fn relay_one(&self, row: &OutboxRow) -> bool {
        if row.topic == OUTBOX_TOPIC {
            return self.relay_envelope(row).await;
        }
        let payload = attach_attempt_marker(row.payload.clone());
        match self.queue.enqueue(&row.topic, payload, EnqueueOptions::default()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(outbox_id = %row.id, topic = %row.topic, error = %err, "failed to enqueue outbox row");
                false
            }
        }
    }

    /// Relays a row recorded on [`OUTBOX_TOPIC`]: parses it as an
    /// [`OutboxEnvelope`] and republishes it onto the `"outbox"` queue topic
    /// verbatim. A row that does not carry a well-formed `runId`/`type`
    /// (§4.C) — whether because it fails to parse as an envelope at all, or
    /// parses with one of those fields empty — is left unsent so the next
    /// tick retries it; operators inspect rows that never clear on their own.
    async fn relay_envelope(&self, row: &OutboxRow) -> bool {
        let envelope: OutboxEnvelope = match serde_json::from_value(row.payload.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(outbox_id = %row.id, error = %err, "malformed outbox envelope, leaving unsent for manual inspection");
                return false;
            }
        };
        if envelope.run_id.as_str().is_empty() || envelope.event_type.is_empty() {
            warn!(outbox_id = %row.id, "outbox envelope missing runId/type, leaving unsent for manual inspection");
            return false;
        }
        let payload = serde_json::to_value(&envelope).unwrap_or_else(|_| json!({}));
        match self.queue.enqueue(OUTBOX_TOPIC, payload, EnqueueOptions::default()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(outbox_id = %row.id, error = %err, "failed to enqueue outbox envelope");
                false
            }
        }
    }
}

fn attach_attempt_marker(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.entry("__attempt").or_insert(json!(1));
            Value::Object(map)
        }
        other => other,
    }
}

/// Spawns [`OutboxRelay::run`] on the current Tokio runtime.
pub fn spawn_outbox_relay(store: Arc<dyn Store>, queue: Arc<dyn Queue>, interval: Duration, batch: usize) -> JoinHandle<()> {
    let relay = OutboxRelay::new(store, queue, interval, batch);
    tokio::spawn(async move {
        relay.run().await;
    })
}

#[cfg(test)]
mod tests {
    use nofx_core::ids::ProjectId;
    use nofx_core::ids::RunId;
    use nofx_core::model::EventType;
    use nofx_core::model::Plan;
    use nofx_core::queue::STEP_READY_TOPIC;
    use nofx_queue::memory::MemoryQueue;
    use nofx_store_fs::FsStore;
    use serde_json::json;

    use super::*;

    async fn fixture() -> (Arc<dyn Store>, Arc<dyn Queue>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn Store> = Arc::new(FsStore::open(dir.path().to_path_buf()).await.expect("open store"));
        let queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new());
        (store, queue, dir)
    }

    #[tokio::test]
    async fn relays_a_step_ready_row_onto_its_own_topic() {
        let (store, queue, _dir) = fixture().await;
        store
            .outbox_add(STEP_READY_TOPIC, json!({ "runId": "r1", "stepId": "s1" }))
            .await
            .expect("add outbox row");

        let relay = OutboxRelay::new(store.clone(), queue.clone(), Duration::from_millis(10), 10);
        relay.tick().await;

        assert_eq!(store.outbox_list_unsent(10).await.expect("outbox"), vec![]);
        let counts = queue.counts(STEP_READY_TOPIC).await.expect("counts");
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn relays_an_event_envelope_onto_the_outbox_topic() {
        let (store, queue, _dir) = fixture().await;
        let run_id = RunId::new("r1");
        let plan = Plan { goal: "hello".into(), steps: vec![], metadata: None };
        let _run = store.create_run(ProjectId::new("p1"), plan.clone()).await.expect("create run");
        let envelope = OutboxEnvelope { run_id, event_type: EventType::RunCreated.as_str().to_string(), step_id: None, payload: Some(json!({})) };
        store.outbox_add(OUTBOX_TOPIC, serde_json::to_value(&envelope).expect("serialize")).await.expect("add outbox row");

        let relay = OutboxRelay::new(store.clone(), queue.clone(), Duration::from_millis(10), 10);
        relay.tick().await;

        let counts = queue.counts(OUTBOX_TOPIC).await.expect("counts");
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_left_unsent_for_manual_inspection() {
        let (store, queue, _dir) = fixture().await;
        store.outbox_add(OUTBOX_TOPIC, json!({ "not": "an envelope" })).await.expect("add outbox row");

        let relay = OutboxRelay::new(store.clone(), queue.clone(), Duration::from_millis(10), 10);
        relay.tick().await;

        let unsent = store.outbox_list_unsent(10).await.expect("outbox");
        assert_eq!(unsent.len(), 1, "a row that never parses must stay unsent, not be silently marked sent");
        let counts = queue.counts(OUTBOX_TOPIC).await.expect("counts");
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn envelope_with_empty_run_id_is_left_unsent_for_manual_inspection() {
        let (store, queue, _dir) = fixture().await;
        let envelope = OutboxEnvelope { run_id: RunId::new(""), event_type: EventType::RunCreated.as_str().to_string(), step_id: None, payload: None };
        store.outbox_add(OUTBOX_TOPIC, serde_json::to_value(&envelope).expect("serialize")).await.expect("add outbox row");

        let relay = OutboxRelay::new(store.clone(), queue.clone(), Duration::from_millis(10), 10);
        relay.tick().await;

        let unsent = store.outbox_list_unsent(10).await.expect("outbox");
        assert_eq!(unsent.len(), 1, "an envelope missing runId must stay unsent, not be silently marked sent");
        let counts = queue.counts(OUTBOX_TOPIC).await.expect("counts");
        assert_eq!(counts.waiting, 0);
    }
}
