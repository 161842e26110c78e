// nofx-store-fs/src/store.rs
// ============================================================================
// Module: FsStore
// Description: Filesystem implementation of `nofx_core::store::Store` (§4.A).
// ============================================================================

//! Every read/write goes through [`atomic::write_json_atomic`]/[`atomic::read_json_opt`]
//! and runs on a blocking thread via [`tokio::task::spawn_blocking`], since the
//! underlying filesystem calls are synchronous. The driver keeps no in-memory
//! index: every list/lookup walks the directory tree named in [`layout`]. That
//! is the right trade for the scale this driver targets (single-node,
//! file-count in the thousands); `nofx-store-sql` is the answer once an index
//! actually matters.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

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
use serde_json::Value;
use thiserror::Error;

use crate::atomic;
use crate::layout;
use crate::lock::FsRunLock;

/// Errors internal to the filesystem driver, converted to [`CoreError`] at the
/// `Store` trait boundary.
#[derive(Debug, Error)]
pub enum FsStoreError {
    /// Any filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The addressed entity does not exist on disk.
    #[error("not found: {0}")]
    NotFound(String),
    /// A background blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(String),
}

impl From<FsStoreError> for CoreError {
    fn from(err: FsStoreError) -> Self {
        match err {
            FsStoreError::NotFound(msg) => CoreError::NotFound(msg),
            FsStoreError::Join(msg) => CoreError::Fatal(msg),
            other => CoreError::Transient(other.to_string()),
        }
    }
}

/// Runs a synchronous filesystem closure on the blocking thread pool.
async fn blocking<F, T>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, FsStoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(join_err) => Err(CoreError::from(FsStoreError::Join(join_err.to_string()))),
    }
}

fn read_dir_entries(dir: &Path) -> Result<Vec<PathBuf>, FsStoreError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn copy_dir_excluding(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|e| name.to_str() == Some(*e)) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_excluding(&src_path, &dst_path, exclude)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Filesystem-backed [`Store`] (§4.A). The path layout under `root` is the
/// stable contract described in [`layout`].
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a filesystem store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if `root` cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        let create_root = root.clone();
        blocking(move || fs::create_dir_all(&create_root).map_err(FsStoreError::from)).await?;
        Ok(Self { root })
    }

    /// Returns the root directory this store is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find_gate_file(root: &Path, gate_id: &GateId) -> Result<Option<(RunId, PathBuf)>, FsStoreError> {
        for run_dir in read_dir_run_dirs(root)? {
            let Some(run_id) = run_dir.file_name().and_then(|n| n.to_str()).map(RunId::new) else {
                continue;
            };
            let gates_dir = layout::gates_dir(root, &run_id);
            for path in read_dir_entries(&gates_dir)? {
                if let Some(gate) = atomic::read_json_opt::<Gate>(&path)? {
                    if &gate.id == gate_id {
                        return Ok(Some((run_id, path)));
                    }
                }
            }
        }
        Ok(None)
    }
}

fn read_dir_run_dirs(root: &Path) -> Result<Vec<PathBuf>, FsStoreError> {
    let runs_dir = layout::runs_dir(root);
    let read_dir = match fs::read_dir(&runs_dir) {
        Ok(rd) => rd,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut dirs = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[async_trait]
impl Store for FsStore {
    async fn lock_run(&self, run_id: &RunId) -> Result<Box<dyn RunLock>, CoreError> {
        let path = layout::run_lock_file(&self.root, run_id);
        let guard = blocking(move || FsRunLock::acquire(&path).map_err(|err| match err {
            CoreError::Transient(msg) => FsStoreError::Io(io::Error::other(msg)),
            other => FsStoreError::Io(io::Error::other(other.to_string())),
        }))
        .await?;
        Ok(Box::new(guard))
    }

    async fn create_run(&self, project_id: ProjectId, plan: Plan) -> Result<Run, CoreError> {
        let run_id = RunId::new(generate_opaque_id("run"));
        let run = Run::new(run_id, project_id, plan);
        let path = layout::run_file(&self.root, &run.id);
        let to_write = run.clone();
        blocking(move || atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)).await?;
        Ok(run)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, CoreError> {
        let path = layout::run_file(&self.root, run_id);
        blocking(move || atomic::read_json_opt(&path).map_err(FsStoreError::from)).await
    }

    async fn update_run(&self, run: &Run) -> Result<(), CoreError> {
        let path = layout::run_file(&self.root, &run.id);
        let to_write = run.clone();
        blocking(move || {
            if !path.exists() {
                return Err(FsStoreError::NotFound(format!("run {} does not exist", to_write.id)));
            }
            atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)
        })
        .await
    }

    async fn list_runs(&self, project_id: Option<&ProjectId>) -> Result<Vec<Run>, CoreError> {
        let root = self.root.clone();
        let project_id = project_id.cloned();
        blocking(move || {
            let mut runs = Vec::new();
            for run_dir in read_dir_run_dirs(&root)? {
                let path = run_dir.join("run.json");
                if let Some(run) = atomic::read_json_opt::<Run>(&path)? {
                    if project_id.as_ref().is_none_or(|p| *p == run.project_id) {
                        runs.push(run);
                    }
                }
            }
            runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(runs)
        })
        .await
    }

    async fn delete_run(&self, run_id: &RunId) -> Result<(), CoreError> {
        let path = layout::run_dir(&self.root, run_id);
        blocking(move || {
            if !path.exists() {
                return Err(FsStoreError::NotFound(format!("run {run_id} does not exist")));
            }
            fs::remove_dir_all(&path).map_err(FsStoreError::from)
        })
        .await
    }

    async fn create_step(
        &self,
        run_id: &RunId,
        name: &str,
        tool: &str,
        inputs: Value,
    ) -> Result<Step, CoreError> {
        let step_id = StepId::new(generate_opaque_id("step"));
        let step = Step::new(step_id, run_id.clone(), name, tool, inputs);
        let path = layout::step_file(&self.root, run_id, &step.id);
        let to_write = step.clone();
        blocking(move || atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)).await?;
        Ok(step)
    }

    async fn get_step(&self, run_id: &RunId, step_id: &StepId) -> Result<Option<Step>, CoreError> {
        let path = layout::step_file(&self.root, run_id, step_id);
        blocking(move || atomic::read_json_opt(&path).map_err(FsStoreError::from)).await
    }

    async fn update_step(&self, step: &Step) -> Result<(), CoreError> {
        let path = layout::step_file(&self.root, &step.run_id, &step.id);
        let to_write = step.clone();
        blocking(move || {
            if !path.exists() {
                return Err(FsStoreError::NotFound(format!("step {} does not exist", to_write.id)));
            }
            atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)
        })
        .await
    }

    async fn list_steps(&self, run_id: &RunId) -> Result<Vec<Step>, CoreError> {
        let root = self.root.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let dir = layout::steps_dir(&root, &run_id);
            let mut steps = Vec::new();
            for path in read_dir_entries(&dir)? {
                if let Some(step) = atomic::read_json_opt::<Step>(&path)? {
                    steps.push(step);
                }
            }
            let run = atomic::read_json_opt::<Run>(&layout::run_file(&root, &run_id))?;
            if let Some(run) = run {
                let order: std::collections::HashMap<&str, usize> =
                    run.plan.steps.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();
                steps.sort_by_key(|s| order.get(s.name.as_str()).copied().unwrap_or(usize::MAX));
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
            step_id: step_id.clone(),
            event_type,
            payload: sanitize_event_payload(payload),
            created_at: nofx_core::time::Timestamp::now(),
        };
        let path = layout::event_file(&self.root, run_id, &event.id);
        let to_write = event.clone();
        blocking(move || atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)).await?;

        let envelope = OutboxEnvelope {
            run_id: event.run_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            step_id: event.step_id.clone(),
            payload: Some(event.payload.clone()),
        };
        if let Ok(payload) = serde_json::to_value(&envelope) {
            let _ = self.outbox_add(OUTBOX_TOPIC, payload).await;
        }

        Ok(event)
    }

    async fn list_events(&self, run_id: &RunId) -> Result<Vec<Event>, CoreError> {
        let root = self.root.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let dir = layout::events_dir(&root, &run_id);
            let mut events = Vec::new();
            for path in read_dir_entries(&dir)? {
                if let Some(event) = atomic::read_json_opt::<Event>(&path)? {
                    events.push(event);
                }
            }
            events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
            Ok(events)
        })
        .await
    }

    async fn create_or_get_gate(&self, run_id: &RunId, gate_type: &str) -> Result<Gate, CoreError> {
        let root = self.root.clone();
        let run_id_owned = run_id.clone();
        let gate_type_owned = gate_type.to_string();
        blocking(move || {
            let dir = layout::gates_dir(&root, &run_id_owned);
            for path in read_dir_entries(&dir)? {
                if let Some(gate) = atomic::read_json_opt::<Gate>(&path)? {
                    if gate.gate_type == gate_type_owned {
                        return Ok(gate);
                    }
                }
            }
            let gate = Gate::new(GateId::new(generate_opaque_id("gate")), run_id_owned.clone(), gate_type_owned);
            let path = layout::gate_file(&root, &run_id_owned, &gate.id);
            atomic::write_json_atomic(&path, &gate)?;
            Ok(gate)
        })
        .await
    }

    async fn update_gate(&self, gate_id: &GateId, status: GateStatus) -> Result<Gate, CoreError> {
        let root = self.root.clone();
        let gate_id = gate_id.clone();
        blocking(move || {
            let Some((run_id, path)) = FsStore::find_gate_file(&root, &gate_id)? else {
                return Err(FsStoreError::NotFound(format!("gate {gate_id} does not exist")));
            };
            let mut gate = atomic::read_json_opt::<Gate>(&path)?
                .ok_or_else(|| FsStoreError::NotFound(format!("gate {gate_id} does not exist")))?;
            gate.update_status(status);
            let path = layout::gate_file(&root, &run_id, &gate.id);
            atomic::write_json_atomic(&path, &gate)?;
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
        let artifact = Artifact {
            id: ArtifactId::new(generate_opaque_id("art")),
            run_id: run_id.clone(),
            step_id: step_id.clone(),
            name: name.to_string(),
            kind,
            location: String::new(),
            created_at: nofx_core::time::Timestamp::now(),
        };
        let mut artifact = artifact;
        let blob_key = artifact.blob_key();
        let root = self.root.clone();
        let meta_path = layout::artifact_file(&self.root, run_id, &artifact.id);
        let blob_path = root.join(&blob_key);
        artifact.location = blob_path.to_string_lossy().into_owned();
        let to_write = artifact.clone();
        blocking(move || {
            if let Some(parent) = blob_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&blob_path, &data)?;
            atomic::write_json_atomic(&meta_path, &to_write).map_err(FsStoreError::from)
        })
        .await?;
        Ok(artifact)
    }

    async fn inbox_mark_if_new(&self, key: &InboxKey) -> Result<bool, CoreError> {
        let path = layout::inbox_file(&self.root, key);
        let entry = InboxEntry::new(key.clone());
        blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut opts = fs::OpenOptions::new();
            opts.write(true).create_new(true);
            match opts.open(&path) {
                Ok(mut file) => {
                    use io::Write;
                    let bytes = serde_json::to_vec_pretty(&entry).map_err(|err| FsStoreError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))?;
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                    Ok(true)
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn inbox_clear(&self, key: &InboxKey) -> Result<(), CoreError> {
        let path = layout::inbox_file(&self.root, key);
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        })
        .await
    }

    async fn outbox_add(&self, topic: &str, payload: Value) -> Result<OutboxRow, CoreError> {
        let row = OutboxRow::new(OutboxId::new(generate_opaque_id("obx")), topic, payload);
        let path = layout::outbox_file(&self.root, &row.id);
        let to_write = row.clone();
        blocking(move || atomic::write_json_atomic(&path, &to_write).map_err(FsStoreError::from)).await?;
        Ok(row)
    }

    async fn outbox_list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, CoreError> {
        let root = self.root.clone();
        blocking(move || {
            let dir = layout::outbox_dir(&root);
            let mut rows = Vec::new();
            for path in read_dir_entries(&dir)? {
                if let Some(row) = atomic::read_json_opt::<OutboxRow>(&path)? {
                    if row.sent_at.is_none() {
                        rows.push(row);
                    }
                }
            }
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            rows.truncate(limit);
            Ok(rows)
        })
        .await
    }

    async fn outbox_mark_sent(&self, id: &OutboxId) -> Result<(), CoreError> {
        let path = layout::outbox_file(&self.root, id);
        blocking(move || {
            let Some(mut row) = atomic::read_json_opt::<OutboxRow>(&path)? else {
                return Ok(());
            };
            row.mark_sent();
            atomic::write_json_atomic(&path, &row).map_err(FsStoreError::from)
        })
        .await
    }

    async fn stage_backup(&self, dest_dir: &Path) -> Result<(), CoreError> {
        let root = self.root.clone();
        let dest_dir = dest_dir.to_path_buf();
        blocking(move || copy_dir_excluding(&root, &dest_dir, &[layout::BACKUPS_DIR_NAME]).map_err(FsStoreError::from)).await
    }

    async fn restore_backup(&self, src_dir: &Path) -> Result<(), CoreError> {
        let root = self.root.clone();
        let src_dir = src_dir.to_path_buf();
        blocking(move || {
            for name in ["runs", "inbox", "outbox"] {
                let existing = root.join(name);
                if existing.exists() {
                    fs::remove_dir_all(&existing)?;
                }
            }
            copy_dir_excluding(&src_dir, &root, &[layout::BACKUPS_DIR_NAME])?;
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

    async fn store() -> FsStore {
        let dir = tempfile::tempdir().expect("tempdir");
        FsStore::open(dir.into_path()).await.expect("open")
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
    async fn record_event_also_appends_a_best_effort_outbox_row() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");
        store.record_event(&run.id, EventType::RunCreated, json!({}), None).await.expect("record");
        let unsent = store.outbox_list_unsent(10).await.expect("list");
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
    async fn stage_and_restore_backup_round_trip_run_data() {
        let store = store().await;
        let run = store.create_run(ProjectId::new("p1"), sample_plan()).await.expect("create");

        let stage_dir = tempfile::tempdir().expect("stage dir");
        store.stage_backup(stage_dir.path()).await.expect("stage");

        let fresh_root = tempfile::tempdir().expect("fresh root");
        let fresh = FsStore::open(fresh_root.path()).await.expect("open fresh");
        fresh.restore_backup(stage_dir.path()).await.expect("restore");

        let restored = fresh.get_run(&run.id).await.expect("get").expect("present");
        assert_eq!(restored.id, run.id);
    }
}
