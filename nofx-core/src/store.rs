// nofx-core/src/store.rs
// ============================================================================
// Module: Store
// Description: The driver-agnostic persistence capability set of §4.A.
// ============================================================================

//! Two interchangeable drivers — `nofx-store-fs` and `nofx-store-sql` —
//! implement [`Store`]. Everything above this trait (the runner, recovery,
//! the outbox relay, the CLI) talks to `Arc<dyn Store>` and never cares which
//! driver is underneath.
//!
//! `withTransaction`/`runAtomically` from §4.A are modelled differently than
//! the higher-order-function shape the spec describes: a trait object can't
//! carry a generic `fn(tx) -> T` method, so the per-run advisory lock is an
//! RAII guard ([`RunLock`]) a caller holds for the duration of a critical
//! section, and the event-plus-outbox transactional pairing is folded into
//! [`Store::record_event`] itself as a driver-internal detail rather than a
//! public higher-order method.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::CoreError;
use crate::ids::GateId;
use crate::ids::InboxKey;
use crate::ids::OutboxId;
use crate::ids::ProjectId;
use crate::ids::RunId;
use crate::ids::StepId;
use crate::model::Artifact;
use crate::model::ArtifactKind;
use crate::model::Event;
use crate::model::EventType;
use crate::model::Gate;
use crate::model::GateStatus;
use crate::model::OutboxRow;
use crate::model::Plan;
use crate::model::Run;
use crate::model::Step;

/// An acquired per-run advisory lock (§4.A `runAtomically`). Dropping the
/// guard releases the lock; the FS driver backs this with a file lock on the
/// run directory, the SQL driver with an in-process mutex keyed by run id
/// (row-level atomicity is provided by the underlying transaction instead).
pub trait RunLock: Send {}

/// Persistent state of runs, steps, events, artifacts, gates, the idempotency
/// inbox, and the outbox (§4.A). Implemented once per driver (FS, SQL).
#[async_trait]
pub trait Store: Send + Sync {
    /// Acquires the per-run advisory lock for the duration the returned guard
    /// is held. Concurrent callers for the same `run_id` block (or queue)
    /// until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the lock cannot be acquired due to
    /// a driver I/O failure.
    async fn lock_run(&self, run_id: &RunId) -> Result<Box<dyn RunLock>, CoreError>;

    /// Creates a new run in `queued` status from a validated plan.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn create_run(&self, project_id: ProjectId, plan: Plan) -> Result<Run, CoreError>;

    /// Loads a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, CoreError>;

    /// Persists a run's current state (status, `ended_at`, metadata, ...).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the run no longer exists, or
    /// [`CoreError::Transient`] on driver I/O failure.
    async fn update_run(&self, run: &Run) -> Result<(), CoreError>;

    /// Lists runs, optionally scoped to a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn list_runs(&self, project_id: Option<&ProjectId>) -> Result<Vec<Run>, CoreError>;

    /// Deletes a run and every entity that references it (steps, events,
    /// artifacts, gates). Administrative operation; not used by the runner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the run does not exist, or
    /// [`CoreError::Transient`] on driver I/O failure.
    async fn delete_run(&self, run_id: &RunId) -> Result<(), CoreError>;

    /// Materialises one step of a run's plan in `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn create_step(
        &self,
        run_id: &RunId,
        name: &str,
        tool: &str,
        inputs: Value,
    ) -> Result<Step, CoreError>;

    /// Loads a step by id, scoped to its owning run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn get_step(&self, run_id: &RunId, step_id: &StepId) -> Result<Option<Step>, CoreError>;

    /// Persists a step's current state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the step no longer exists, or
    /// [`CoreError::Transient`] on driver I/O failure.
    async fn update_step(&self, step: &Step) -> Result<(), CoreError>;

    /// Lists every step of a run, in plan order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn list_steps(&self, run_id: &RunId) -> Result<Vec<Step>, CoreError>;

    /// Counts steps of a run whose status is not terminal (§4.A): used by the
    /// runner to decide whether a run has finished.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn count_remaining_steps(&self, run_id: &RunId) -> Result<u64, CoreError>;

    /// Appends an event to a run's log and, in the same atomic unit, writes a
    /// matching outbox row (§4.C). Under the FS driver the outbox append is
    /// best-effort and its failure is swallowed; under the SQL driver both
    /// writes happen in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure while writing
    /// the event itself (outbox failures never surface here).
    async fn record_event(
        &self,
        run_id: &RunId,
        event_type: EventType,
        payload: Value,
        step_id: Option<StepId>,
    ) -> Result<Event, CoreError>;

    /// Lists events for a run, ordered by `(created_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn list_events(&self, run_id: &RunId) -> Result<Vec<Event>, CoreError>;

    /// Creates, or returns the existing, gate for `(run_id, gate_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn create_or_get_gate(&self, run_id: &RunId, gate_type: &str) -> Result<Gate, CoreError>;

    /// Updates a gate's status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the gate does not exist, or
    /// [`CoreError::Transient`] on driver I/O failure.
    async fn update_gate(&self, gate_id: &GateId, status: GateStatus) -> Result<Gate, CoreError>;

    /// Persists an artifact produced by a step.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn add_artifact(
        &self,
        run_id: &RunId,
        step_id: &StepId,
        name: &str,
        kind: ArtifactKind,
        data: Vec<u8>,
    ) -> Result<Artifact, CoreError>;

    /// Atomically marks `key` observed, returning `true` iff this is the
    /// first observation (insert-or-ignore semantics, §3/§4.G).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure. Callers must
    /// treat this as a non-blocking degrade-to-at-least-once signal per
    /// §4.G, not propagate it as a fatal error.
    async fn inbox_mark_if_new(&self, key: &InboxKey) -> Result<bool, CoreError>;

    /// Clears an inbox entry, bounding inbox size after a step reaches a
    /// terminal outcome or needs its key freed for retry (§4.E, §4.G).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn inbox_clear(&self, key: &InboxKey) -> Result<(), CoreError>;

    /// Appends an outbox row awaiting relay.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn outbox_add(&self, topic: &str, payload: Value) -> Result<OutboxRow, CoreError>;

    /// Lists up to `limit` outbox rows with `sent_at = null`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn outbox_list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, CoreError>;

    /// Marks an outbox row sent. Idempotent: marking an already-sent row is a
    /// no-op, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    async fn outbox_mark_sent(&self, id: &OutboxId) -> Result<(), CoreError>;

    /// Stages a backup of this store's data under `dest_dir` (§4.I); the
    /// backup orchestrator in `nofx-backup` archives the staged tree and
    /// assigns the resulting [`BackupId`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on I/O failure while staging.
    async fn stage_backup(&self, dest_dir: &std::path::Path) -> Result<(), CoreError>;

    /// Restores this store's data from a staged tree at `src_dir`, replacing
    /// all current state (§4.I). Callers must take a pre-restore snapshot
    /// first; this method performs no snapshotting of its own.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on I/O failure while restoring.
    async fn restore_backup(&self, src_dir: &std::path::Path) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyLock;
    impl RunLock for DummyLock {}

    #[test]
    fn run_lock_is_object_safe() {
        let lock: Box<dyn RunLock> = Box::new(DummyLock);
        drop(lock);
    }
}
