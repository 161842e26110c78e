// nofx-core/src/model/gate.rs
// ============================================================================
// Module: Gate
// Description: The Gate entity (§3). A step of tool `gate:<type>`
// creates-or-gets a gate by (run_id, gate_type).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::GateId;
use crate::ids::RunId;
use crate::time::Timestamp;

/// Gate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Created, not yet evaluated.
    Pending,
    /// Evaluated and satisfied.
    Passed,
    /// Evaluated and unsatisfied.
    Failed,
    /// Manually bypassed.
    Waived,
}

/// A gate: a named checkpoint within a run, addressed by `(run_id, gate_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    /// Gate identifier.
    pub id: GateId,
    /// Owning run.
    pub run_id: RunId,
    /// The `<type>` suffix of the `gate:<type>` tool name that created this gate.
    pub gate_type: String,
    /// Current status.
    pub status: GateStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last-updated time.
    pub updated_at: Timestamp,
}

impl Gate {
    /// Creates a new pending gate.
    #[must_use]
    pub fn new(id: GateId, run_id: RunId, gate_type: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self { id, run_id, gate_type: gate_type.into(), status: GateStatus::Pending, created_at: now, updated_at: now }
    }

    /// Updates the gate's status, bumping `updated_at`.
    pub fn update_status(&mut self, status: GateStatus) {
        self.status = status;
        self.updated_at = Timestamp::now();
    }
}
