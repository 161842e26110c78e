// nofx-store-sql/src/store.rs
// ============================================================================
// Module: SqlStore
// Description: SQLite implementation of `nofx_core::store::Store` (§4.A).
// ============================================================================

//! Every query runs on the blocking thread pool via [`tokio::task::spawn_blocking`]
//! against a single [`Connection`] guarded by a [`Mutex`], mirroring the
//! async/blocking bridge `nofx-store-fs` uses for synchronous filesystem
//! calls. The one behavior this driver provides that the filesystem driver
//! cannot is [`Store::record_event`]'s transactional event-plus-outbox write:
//! both rows commit or neither does.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use nofx_core::errors::CoreError;
use nofx_core::ids::ArtifactId;
use nofx_core::ids::EventId;
use nofx_core::ids::GateId;
use nofx_core::ids::InboxKey;
use nofx_core::ids::OutboxId;
use nofx_core::ids::ProjectId;
use nofx_core::ids::RunId;
use nofx_core::ids::StepId;
use nofx_core::ids::generate_opaque_id;
use nofx_core::model::Artifact;
use nofx_core::model::ArtifactKind;
use nofx_core::model::Event;
use nofx_core::model::EventType;
use nofx_core::model::Gate;
use nofx_core::model::GateStatus;
use nofx_core::model::InboxEntry;
use nofx_core::model::OutboxRow;
use nofx_core::model::Plan;
use nofx_core::model::Run;
use nofx_core::model::Step;
use nofx_core::model::sanitize_event_payload;
use nofx_core::queue::OUTBOX_TOPIC;
use nofx_core::queue::OutboxEnvelope;
use nofx_core::store::RunLock;
use nofx_core::store::Store;
use nofx_core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

use crate::codec;
use crate::schema;

/// Errors internal to the SQLite driver, converted to [`CoreError`] at the
/// `Store` trait boundary.
#[derive(Debug, Error)]
pub enum SqlStoreError {
    /// Any `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Any filesystem failure outside `SQLite` itself (opening the db path,
    /// staging a backup destination).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A background blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(String),
    /// A JSON column failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A timestamp column was not valid RFC 3339 text.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    /// A column held a value this driver's codecs do not accept.
    #[error("invalid value: {0}")]
    Invalid(String),
    /// The database is at a schema version newer than this driver understands.
    #[error("unsupported schema version: {0}")]
    SchemaVersion(i64),
}

impl From<SqlStoreError> for CoreError {
    fn from(err: SqlStoreError) -> Self {
        match err {
            SqlStoreError::NotFound(msg) => Self::NotFound(msg),
            SqlStoreError::Join(msg) => Self::Fatal(msg),
            SqlStoreError::SchemaVersion(v) => Self::Fatal(format!("unsupported schema version: {v}")),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Runs a synchronous `SQLite` closure on the blocking thread pool.
async fn blocking<F, T>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, SqlStoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(join_err) => Err(CoreError::from(SqlStoreError::Join(join_err.to_string()))),
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

const BACKUP_PAGES_PER_STEP: i32 = -1;

/// `SQLite`-backed [`Store`] (§4.A, §4.A.1).
pub struct SqlStore {
    conn: Arc<Mutex<Connection>>,
    /// Per-run advisory locks, backing `runAtomically` with an in-process
    /// mutex rather than a file lock (row-level atomicity is already
    /// provided by the underlying transaction for any single write; this
    /// guards the multi-step critical sections the runner and recovery hold
    /// it across).
    locks: Mutex<HashMap<RunId, Arc<AsyncMutex<()>>>>,
}

impl SqlStore {
    /// Opens (creating if needed) a `SQLite` store at `path`, initializing
    /// the schema if this is a fresh database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the database cannot be opened, or
    /// [`CoreError::Fatal`] if its schema version is newer than this driver
    /// understands.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let conn = blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut conn = Connection::open(&path)?;
            schema::init_schema(&mut conn)?;
            Ok(conn)
        })
        .await?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), locks: Mutex::new(HashMap::new()) })
    }
}

struct SqlRunLock {
    _guard: OwnedMutexGuard<()>,
}

impl RunLock for SqlRunLock {}

struct RunRow {
    id: String,
    project_id: String,
    status: String,
    plan_json: String,
    created_at: String,
    ended_at: Option<String>,
    title: Option<String>,
    metadata_json: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status: row.get(2)?,
            plan_json: row.get(3)?,
            created_at: row.get(4)?,
            ended_at: row.get(5)?,
            title: row.get(6)?,
            metadata_json: row.get(7)?,
        })
    }

    fn into_run(self) -> Result<Run, SqlStoreError> {
        Ok(Run {
            id: RunId::new(self.id),
            project_id: ProjectId::new(self.project_id),
            status: codec::text_to_enum(&self.status)?,
            plan: serde_json::from_str(&self.plan_json)?,
            created_at: codec::decode_timestamp(&self.created_at)?,
            ended_at: self.ended_at.as_deref().map(codec::decode_timestamp).transpose()?,
            title: self.title,
            metadata: self.metadata_json.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

fn insert_run(conn: &Connection, run: &Run) -> Result<(), SqlStoreError> {
    conn.execute(
        "INSERT INTO runs (id, project_id, status, plan_json, created_at, ended_at, title, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.id.as_str(),
            run.project_id.as_str(),
            codec::enum_to_text(&run.status)?,
            serde_json::to_string(&run.plan)?,
            codec::encode_timestamp(run.created_at)?,
            run.ended_at.map(codec::encode_timestamp).transpose()?,
            run.title,
            run.metadata.as_ref().map(serde_json::to_string).transpose()?,
        ],
    )?;
    Ok(())
}

struct StepRow {
    id: String,
    run_id: String,
    name: String,
    tool: String,
    inputs_json: String,
    status: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    outputs_json: Option<String>,
    idempotency_key: Option<String>,
    attempts: i64,
}

impl StepRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            name: row.get(2)?,
            tool: row.get(3)?,
            inputs_json: row.get(4)?,
            status: row.get(5)?,
            started_at: row.get(6)?,
            ended_at: row.get(7)?,
            outputs_json: row.get(8)?,
            idempotency_key: row.get(9)?,
            attempts: row.get(10)?,
        })
    }

    fn into_step(self) -> Result<Step, SqlStoreError> {
        Ok(Step {
            id: StepId::new(self.id),
            run_id: RunId::new(self.run_id),
            name: self.name,
            tool: self.tool,
            inputs: serde_json::from_str(&self.inputs_json)?,
            status: codec::text_to_enum(&self.status)?,
            started_at: self.started_at.as_deref().map(codec::decode_timestamp).transpose()?,
            ended_at: self.ended_at.as_deref().map(codec::decode_timestamp).transpose()?,
            outputs: self.outputs_json.as_deref().map(serde_json::from_str).transpose()?,
            idempotency_key: self.idempotency_key.map(InboxKey::new),
            attempts: u32::try_from(self.attempts).unwrap_or(0),
        })
    }
}

fn insert_step(conn: &Connection, step: &Step, plan_order: i64) -> Result<(), SqlStoreError> {
    conn.execute(
        "INSERT INTO steps (id, run_id, name, tool, inputs_json, status, started_at, ended_at, outputs_json, idempotency_key, attempts, plan_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            step.id.as_str(),
            step.run_id.as_str(),
            step.name,
            step.tool,
            serde_json::to_string(&step.inputs)?,
            codec::enum_to_text(&step.status)?,
            step.started_at.map(codec::encode_timestamp).transpose()?,
            step.ended_at.map(codec::encode_timestamp).transpose()?,
            step.outputs.as_ref().map(serde_json::to_string).transpose()?,
            step.idempotency_key.as_ref().map(InboxKey::as_str),
            i64::from(step.attempts),
            plan_order,
        ],
    )?;
    Ok(())
}

/// Looks up the index of `step_name` in the owning run's plan, used to give
/// freshly materialised steps the same total order `nofx-store-fs` derives
/// on read; here it is written once at `create_step` time instead.
fn plan_order_for(conn: &Connection, run_id: &RunId, step_name: &str) -> Result<i64, SqlStoreError> {
    let plan_json: Option<String> =
        conn.query_row("SELECT plan_json FROM runs WHERE id = ?1", params![run_id.as_str()], |row| row.get(0)).optional()?;
    let Some(plan_json) = plan_json else {
        return Ok(i64::MAX);
    };
    let plan: Plan = serde_json::from_str(&plan_json)?;
    let position = plan.steps.iter().position(|s| s.name == step_name);
    Ok(position.map_or(i64::MAX, |i| i64::try_from(i).unwrap_or(i64::MAX)))
}

struct EventRow {
    id: String,
    run_id: String,
    step_id: Option<String>,
    event_type: String,
    payload_json: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            step_id: row.get(2)?,
            event_type: row.get(3)?,
            payload_json: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<Event, SqlStoreError> {
        Ok(Event {
            id: EventId::new(self.id),
            run_id: RunId::new(self.run_id),
            step_id: self.step_id.map(StepId::new),
            event_type: codec::text_to_enum(&self.event_type)?,
            payload: serde_json::from_str(&self.payload_json)?,
            created_at: codec::decode_timestamp(&self.created_at)?,
        })
    }
}

struct GateRow {
    id: String,
    run_id: String,
    gate_type: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl GateRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            gate_type: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_gate(self) -> Result<Gate, SqlStoreError> {
        Ok(Gate {
            id: GateId::new(self.id),
            run_id: RunId::new(self.run_id),
            gate_type: self.gate_type,
            status: codec::text_to_enum(&self.status)?,
            created_at: codec::decode_timestamp(&self.created_at)?,
            updated_at: codec::decode_timestamp(&self.updated_at)?,
        })
    }
}

struct RawOutboxRow {
    id: String,
    topic: String,
    payload_json: String,
    created_at: String,
    sent_at: Option<String>,
}

impl RawOutboxRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic: row.get(1)?,
            payload_json: row.get(2)?,
            created_at: row.get(3)?,
            sent_at: row.get(4)?,
        })
    }

    fn into_outbox_row(self) -> Result<OutboxRow, SqlStoreError> {
        Ok(OutboxRow {
            id: OutboxId::new(self.id),
            topic: self.topic,
            payload: serde_json::from_str(&self.payload_json)?,
            created_at: codec::decode_timestamp(&self.created_at)?,
            sent_at: self.sent_at.as_deref().map(codec::decode_timestamp).transpose()?,
        })
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn lock_run(&self, run_id: &RunId) -> Result<Box<dyn RunLock>, CoreError> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(run_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        let guard = mutex.lock_owned().await;
        Ok(Box::new(SqlRunLock { _guard: guard }))
    }

    async fn create_run(&self, project_id: ProjectId, plan: Plan) -> Result<Run, CoreError> {
        let run_id = RunId::new(generate_opaque_id("run"));
        let run = Run::new(run_id, project_id, plan);
        let conn = self.conn.clone();
        let to_write = run.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            insert_run(&conn, &to_write)
        })
        .await?;
        Ok(run)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let row = conn
                .query_row(
                    "SELECT id, project_id, status, plan_json, created_at, ended_at, title, metadata_json
                     FROM runs WHERE id = ?1",
                    params![run_id.as_str()],
                    RunRow::from_row,
                )
                .optional()?;
            row.map(RunRow::into_run).transpose()
        })
        .await
    }

    async fn update_run(&self, run: &Run) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let to_write = run.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let changed = conn.execute(
                "UPDATE runs SET status = ?2, plan_json = ?3, ended_at = ?4, title = ?5, metadata_json = ?6 WHERE id = ?1",
                params![
                    to_write.id.as_str(),
                    codec::enum_to_text(&to_write.status)?,
                    serde_json::to_string(&to_write.plan)?,
                    to_write.ended_at.map(codec::encode_timestamp).transpose()?,
                    to_write.title,
                    to_write.metadata.as_ref().map(serde_json::to_string).transpose()?,
                ],
            )?;
            if changed == 0 {
                return Err(SqlStoreError::NotFound(format!("run {} does not exist", to_write.id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_runs(&self, project_id: Option<&ProjectId>) -> Result<Vec<Run>, CoreError> {
        let conn = self.conn.clone();
        let project_id = project_id.map(|p| p.as_str().to_string());
        blocking(move || {
            let conn = lock_conn(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, project_id, status, plan_json, created_at, ended_at, title, metadata_json
                 FROM runs WHERE (?1 IS NULL OR project_id = ?1) ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![project_id], RunRow::from_row)?;
            let mut runs = Vec::new();
            for row in rows {
                runs.push(row?.into_run()?);
            }
            Ok(runs)
        })
        .await
    }

    async fn delete_run(&self, run_id: &RunId) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let changed = conn.execute("DELETE FROM runs WHERE id = ?1", params![run_id.as_str()])?;
            if changed == 0 {
                return Err(SqlStoreError::NotFound(format!("run {run_id} does not exist")));
            }
            Ok(())
        })
        .await
    }

    async fn create_step(&self, run_id: &RunId, name: &str, tool: &str, inputs: Value) -> Result<Step, CoreError> {
        let step_id = StepId::new(generate_opaque_id("step"));
        let step = Step::new(step_id, run_id.clone(), name, tool, inputs);
        let conn = self.conn.clone();
        let to_write = step.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let plan_order = plan_order_for(&conn, &to_write.run_id, &to_write.name)?;
            insert_step(&conn, &to_write, plan_order)
        })
        .await?;
        Ok(step)
    }

    async fn get_step(&self, run_id: &RunId, step_id: &StepId) -> Result<Option<Step>, CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        let step_id = step_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let row = conn
                .query_row(
                    "SELECT id, run_id, name, tool, inputs_json, status, started_at, ended_at, outputs_json, idempotency_key, attempts
                     FROM steps WHERE id = ?1 AND run_id = ?2",
                    params![step_id.as_str(), run_id.as_str()],
                    StepRow::from_row,
                )
                .optional()?;
            row.map(StepRow::into_step).transpose()
        })
        .await
    }

    async fn update_step(&self, step: &Step) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let to_write = step.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let changed = conn.execute(
                "UPDATE steps SET status = ?2, started_at = ?3, ended_at = ?4, outputs_json = ?5, idempotency_key = ?6, attempts = ?7
                 WHERE id = ?1",
                params![
                    to_write.id.as_str(),
                    codec::enum_to_text(&to_write.status)?,
                    to_write.started_at.map(codec::encode_timestamp).transpose()?,
                    to_write.ended_at.map(codec::encode_timestamp).transpose()?,
                    to_write.outputs.as_ref().map(serde_json::to_string).transpose()?,
                    to_write.idempotency_key.as_ref().map(InboxKey::as_str),
                    i64::from(to_write.attempts),
                ],
            )?;
            if changed == 0 {
                return Err(SqlStoreError::NotFound(format!("step {} does not exist", to_write.id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_steps(&self, run_id: &RunId) -> Result<Vec<Step>, CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, run_id, name, tool, inputs_json, status, started_at, ended_at, outputs_json, idempotency_key, attempts
                 FROM steps WHERE run_id = ?1 ORDER BY plan_order",
            )?;
            let rows = stmt.query_map(params![run_id.as_str()], StepRow::from_row)?;
            let mut steps = Vec::new();
            for row in rows {
                steps.push(row?.into_step()?);
            }
            Ok(steps)
        })
        .await
    }

    async fn count_remaining_steps(&self, run_id: &RunId) -> Result<u64, CoreError> {
        let steps = self.list_steps(run_id).await?;
        Ok(steps.iter().filter(|s| !s.status.is_terminal()).count() as u64)
    }

    async fn record_event(
        &self,
        run_id: &RunId,
        event_type: EventType,
        payload: Value,
        step_id: Option<StepId>,
    ) -> Result<Event, CoreError> {
        let event = Event {
            id: EventId::new(generate_opaque_id("evt")),
            run_id: run_id.clone(),
            step_id,
            event_type,
            payload: sanitize_event_payload(payload),
            created_at: Timestamp::now(),
        };
        let conn = self.conn.clone();
        let to_write = event.clone();
        blocking(move || {
            let mut conn = lock_conn(&conn);
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO events (id, run_id, step_id, event_type, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    to_write.id.as_str(),
                    to_write.run_id.as_str(),
                    to_write.step_id.as_ref().map(StepId::as_str),
                    codec::enum_to_text(&to_write.event_type)?,
                    serde_json::to_string(&to_write.payload)?,
                    codec::encode_timestamp(to_write.created_at)?,
                ],
            )?;

            let envelope = OutboxEnvelope {
                run_id: to_write.run_id.clone(),
                event_type: to_write.event_type.as_str().to_string(),
                step_id: to_write.step_id.clone(),
                payload: Some(to_write.payload.clone()),
            };
            let outbox_row = OutboxRow::new(OutboxId::new(generate_opaque_id("obx")), OUTBOX_TOPIC, serde_json::to_value(&envelope)?);
            tx.execute(
                "INSERT INTO outbox (id, topic, payload_json, created_at, sent_at) VALUES (?1, ?2, ?3, ?4, NULL)",
                params![
                    outbox_row.id.as_str(),
                    outbox_row.topic,
                    serde_json::to_string(&outbox_row.payload)?,
                    codec::encode_timestamp(outbox_row.created_at)?,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(event)
    }

    async fn list_events(&self, run_id: &RunId) -> Result<Vec<Event>, CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, run_id, step_id, event_type, payload_json, created_at
                 FROM events WHERE run_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![run_id.as_str()], EventRow::from_row)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?.into_event()?);
            }
            Ok(events)
        })
        .await
    }

    async fn create_or_get_gate(&self, run_id: &RunId, gate_type: &str) -> Result<Gate, CoreError> {
        let conn = self.conn.clone();
        let run_id = run_id.clone();
        let gate_type = gate_type.to_string();
        blocking(move || {
            let conn = lock_conn(&conn);
            let existing = conn
                .query_row(
                    "SELECT id, run_id, gate_type, status, created_at, updated_at FROM gates WHERE run_id = ?1 AND gate_type = ?2",
                    params![run_id.as_str(), gate_type.as_str()],
                    GateRow::from_row,
                )
                .optional()?;
            if let Some(row) = existing {
                return row.into_gate();
            }
            let gate = Gate::new(GateId::new(generate_opaque_id("gate")), run_id, gate_type);
            conn.execute(
                "INSERT INTO gates (id, run_id, gate_type, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    gate.id.as_str(),
                    gate.run_id.as_str(),
                    gate.gate_type,
                    codec::enum_to_text(&gate.status)?,
                    codec::encode_timestamp(gate.created_at)?,
                    codec::encode_timestamp(gate.updated_at)?,
                ],
            )?;
            Ok(gate)
        })
        .await
    }

    async fn update_gate(&self, gate_id: &GateId, status: GateStatus) -> Result<Gate, CoreError> {
        let conn = self.conn.clone();
        let gate_id = gate_id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let existing = conn
                .query_row(
                    "SELECT id, run_id, gate_type, status, created_at, updated_at FROM gates WHERE id = ?1",
                    params![gate_id.as_str()],
                    GateRow::from_row,
                )
                .optional()?;
            let Some(row) = existing else {
                return Err(SqlStoreError::NotFound(format!("gate {gate_id} does not exist")));
            };
            let mut gate = row.into_gate()?;
            gate.update_status(status);
            conn.execute(
                "UPDATE gates SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![gate.id.as_str(), codec::enum_to_text(&gate.status)?, codec::encode_timestamp(gate.updated_at)?],
            )?;
            Ok(gate)
        })
        .await
    }

    async fn add_artifact(
        &self,
        run_id: &RunId,
        step_id: &StepId,
        name: &str,
        kind: ArtifactKind,
        data: Vec<u8>,
    ) -> Result<Artifact, CoreError> {
        let mut artifact = Artifact {
            id: ArtifactId::new(generate_opaque_id("art")),
            run_id: run_id.clone(),
            step_id: step_id.clone(),
            name: name.to_string(),
            kind,
            location: String::new(),
            created_at: Timestamp::now(),
        };
        artifact.location = artifact.blob_key();
        let conn = self.conn.clone();
        let to_write = artifact.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            conn.execute(
                "INSERT INTO artifacts (id, run_id, step_id, name, kind, location, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    to_write.id.as_str(),
                    to_write.run_id.as_str(),
                    to_write.step_id.as_str(),
                    to_write.name,
                    codec::enum_to_text(&to_write.kind)?,
                    to_write.location,
                    data,
                    codec::encode_timestamp(to_write.created_at)?,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(artifact)
    }

    async fn inbox_mark_if_new(&self, key: &InboxKey) -> Result<bool, CoreError> {
        let conn = self.conn.clone();
        let entry = InboxEntry::new(key.clone());
        blocking(move || {
            let conn = lock_conn(&conn);
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO inbox (key, created_at) VALUES (?1, ?2)",
                params![entry.key.as_str(), codec::encode_timestamp(entry.created_at)?],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn inbox_clear(&self, key: &InboxKey) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let key = key.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            conn.execute("DELETE FROM inbox WHERE key = ?1", params![key.as_str()])?;
            Ok(())
        })
        .await
    }

    async fn outbox_add(&self, topic: &str, payload: Value) -> Result<OutboxRow, CoreError> {
        let row = OutboxRow::new(OutboxId::new(generate_opaque_id("obx")), topic, payload);
        let conn = self.conn.clone();
        let to_write = row.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            conn.execute(
                "INSERT INTO outbox (id, topic, payload_json, created_at, sent_at) VALUES (?1, ?2, ?3, ?4, NULL)",
                params![
                    to_write.id.as_str(),
                    to_write.topic,
                    serde_json::to_string(&to_write.payload)?,
                    codec::encode_timestamp(to_write.created_at)?,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(row)
    }

    async fn outbox_list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, CoreError> {
        let conn = self.conn.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(
                "SELECT id, topic, payload_json, created_at, sent_at FROM outbox
                 WHERE sent_at IS NULL ORDER BY created_at LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], RawOutboxRow::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.into_outbox_row()?);
            }
            Ok(out)
        })
        .await
    }

    async fn outbox_mark_sent(&self, id: &OutboxId) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let id = id.clone();
        blocking(move || {
            let conn = lock_conn(&conn);
            let sent_at = codec::encode_timestamp(Timestamp::now())?;
            conn.execute("UPDATE outbox SET sent_at = ?2 WHERE id = ?1 AND sent_at IS NULL", params![id.as_str(), sent_at])?;
            Ok(())
        })
        .await
    }

    async fn stage_backup(&self, dest_dir: &Path) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let dest_dir = dest_dir.to_path_buf();
        blocking(move || {
            std::fs::create_dir_all(&dest_dir)?;
            let source = lock_conn(&conn);
            let mut dest = Connection::open(dest_dir.join(schema::DB_FILE_NAME))?;
            let backup = rusqlite::backup::Backup::new(&source, &mut dest)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(0), None)?;
            Ok(())
        })
        .await
    }

    async fn restore_backup(&self, src_dir: &Path) -> Result<(), CoreError> {
        let conn = self.conn.clone();
        let src_dir = src_dir.to_path_buf();
        blocking(move || {
            let src = Connection::open(src_dir.join(schema::DB_FILE_NAME))?;
            let mut dest = lock_conn(&conn);
            let backup = rusqlite::backup::Backup::new(&src, &mut dest)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(0), None)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use nofx_core::model::PlanStep;
    use serde_json::json;

    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            goal: "demo".into(),
            steps: vec![
                PlanStep { name: "a".into(), tool: "echo".into(), inputs: json!({}) },
                PlanStep { name: "b".into(), tool: "echo".into(), inputs: json!({}) },
            ],
            metadata: None,
        }
    }

    async fn store() -> SqlStore {
        let dir = tempfile::tempdir().expect("tempdir");
        SqlStore::open(dir.keep().join("store.sqlite3")).await.expect("open")
    }

    #[tokio::test]
    async fn creates_and_loads_a_run() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        let loaded = store.get_run(&run.id).await.expect("get").expect("present");
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.project_id, ProjectId::new("p1"));
    }

    #[tokio::test]
    async fn update_run_rejects_missing_run() {
        let store = store().await;
        let run = Run::new(RunId::new("ghost"), ProjectId::new("p1"), sample_plan());
        assert!(store.update_run(&run).await.is_err());
    }

    #[tokio::test]
    async fn list_steps_follows_plan_order_regardless_of_creation_order() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        store.create_step(&run.id, "b", "echo", json!({})).await.expect("create b");
        store.create_step(&run.id, "a", "echo", json!({})).await.expect("create a");
        let steps = store.list_steps(&run.id).await.expect("list");
        let names: Vec<_> = steps.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn inbox_mark_if_new_is_observe_once() {
        let store = store().await;
        let key = InboxKey::new("step:r1:s1:{}");
        assert!(store.inbox_mark_if_new(&key).await.expect("first"));
        assert!(!store.inbox_mark_if_new(&key).await.expect("second"));
        store.inbox_clear(&key).await.expect("clear");
        assert!(store.inbox_mark_if_new(&key).await.expect("after clear"));
    }

    #[tokio::test]
    async fn outbox_round_trips_and_lists_unsent_oldest_first() {
        let store = store().await;
        let first = store.outbox_add("t", json!({ "n": 1 })).await.expect("add 1");
        let _second = store.outbox_add("t", json!({ "n": 2 })).await.expect("add 2");
        let unsent = store.outbox_list_unsent(10).await.expect("list");
        assert_eq!(unsent.len(), 2);
        assert_eq!(unsent[0].id, first.id);
        store.outbox_mark_sent(&first.id).await.expect("mark sent");
        let unsent = store.outbox_list_unsent(10).await.expect("list again");
        assert_eq!(unsent.len(), 1);
    }

    #[tokio::test]
    async fn record_event_commits_event_and_outbox_row_together() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        store.record_event(&run.id, EventType::RunCreated, json!({}), None).await.expect("record");
        let events = store.list_events(&run.id).await.expect("list events");
        assert_eq!(events.len(), 1);
        let unsent = store.outbox_list_unsent(10).await.expect("list outbox");
        assert_eq!(unsent.len(), 1);
    }

    #[tokio::test]
    async fn create_or_get_gate_is_idempotent_per_type() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        let first = store.create_or_get_gate(&run.id, "qa").await.expect("first");
        let second = store.create_or_get_gate(&run.id, "qa").await.expect("second");
        assert_eq!(first.id, second.id);
        let updated = store.update_gate(&first.id, GateStatus::Passed).await.expect("update");
        assert_eq!(updated.status, GateStatus::Passed);
    }

    #[tokio::test]
    async fn add_artifact_round_trips_bytes() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        let step = store.create_step(&run.id, "a", "echo", json!({})).await.expect("create step");
        let artifact =
            store.add_artifact(&run.id, &step.id, "out.txt", ArtifactKind::BlobObject, b"hello".to_vec()).await.expect("artifact");
        assert_eq!(artifact.blob_key(), format!("artifacts/{}/{}/out.txt", run.id, step.id));
    }

    #[tokio::test]
    async fn stage_and_restore_backup_round_trip_run_data() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");

        let stage_dir = tempfile::tempdir().expect("stage dir");
        store.stage_backup(stage_dir.path()).await.expect("stage");

        let fresh_path = tempfile::tempdir().expect("fresh dir").keep().join("restored.sqlite3");
        let fresh = SqlStore::open(fresh_path).await.expect("open fresh");
        fresh.restore_backup(stage_dir.path()).await.expect("restore");

        let restored = fresh.get_run(&run.id).await.expect("get").expect("present");
        assert_eq!(restored.id, run.id);
    }
}
