// nofx-core/src/model/run.rs
// ============================================================================
// Module: Run
// Description: The Run entity and its status state machine (§3, §4.D).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::ProjectId;
use crate::ids::RunId;
use crate::model::plan::Plan;
use crate::time::Timestamp;

/// Run status. `queued --start--> running --succeed/fail--> {succeeded | failed}`;
/// `* --cancel--> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no step has started yet.
    Queued,
    /// At least one step has started.
    Running,
    /// All steps reached a terminal state with no failures.
    Succeeded,
    /// At least one step failed or timed out.
    Failed,
    /// Administratively cancelled.
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses per §3: `{succeeded, failed, cancelled}`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A run: an execution of a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Current status.
    pub status: RunStatus,
    /// The plan this run executes.
    pub plan: Plan,
    /// Creation time.
    pub created_at: Timestamp,
    /// Terminal time, set exactly when `status.is_terminal()` becomes true.
    pub ended_at: Option<Timestamp>,
    /// Optional human-readable title, used by backup id slugging (§4.I).
    pub title: Option<String>,
    /// Caller-supplied metadata, opaque to the core.
    pub metadata: Option<Value>,
}

impl Run {
    /// Creates a new run in `queued` status.
    #[must_use]
    pub fn new(id: RunId, project_id: ProjectId, plan: Plan) -> Self {
        let title = plan.goal.clone();
        Self {
            id,
            project_id,
            status: RunStatus::Queued,
            plan,
            created_at: Timestamp::now(),
            ended_at: None,
            title: Some(title),
            metadata: None,
        }
    }

    /// Transitions the run to a terminal status, setting `ended_at`. No-op if
    /// already terminal (invariant 1 in §8: terminal status implies `ended_at`
    /// is set exactly once, never rewritten).
    pub fn transition_terminal(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal(), "transition_terminal called with a non-terminal status");
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(Timestamp::now());
    }

    /// Transitions the run to `running`, which carries no `ended_at` change.
    pub fn transition_running(&mut self) {
        if self.status == RunStatus::Queued {
            self.status = RunStatus::Running;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plan::Plan;

    fn sample_plan() -> Plan {
        Plan { goal: "hello".into(), steps: vec![], metadata: None }
    }

    #[test]
    fn terminal_transition_sets_ended_at_once() {
        let mut run = Run::new(RunId::new("r1"), ProjectId::new("p1"), sample_plan());
        assert!(run.ended_at.is_none());
        run.transition_terminal(RunStatus::Succeeded);
        let first = run.ended_at;
        assert!(first.is_some());
        run.transition_terminal(RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.ended_at, first);
    }

    #[test]
    fn running_transition_only_applies_from_queued() {
        let mut run = Run::new(RunId::new("r1"), ProjectId::new("p1"), sample_plan());
        run.transition_terminal(RunStatus::Cancelled);
        run.transition_running();
        assert_eq!(run.status, RunStatus::Cancelled);
    }
}
