// nofx-core/src/model/plan.rs
// ============================================================================
// Module: Plan
// Description: The external plan-input contract (§6).
// ============================================================================

//! A plan is the caller-supplied description of a run. The core only rejects
//! structural violations (missing fields, wrong types); semantic validation
//! (does `tool` name a real handler, are `inputs` well-formed for that tool) is
//! deferred to run time, per §1's "the core rejects only structural violations."

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A user-supplied plan: an ordered sequence of named steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Human-readable description of what the run is for.
    pub goal: String,
    /// Ordered steps to materialise as [`crate::model::Step`] rows.
    pub steps: Vec<PlanStep>,
    /// Caller-supplied metadata, opaque to the core.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// One step within a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step name, unique within the plan.
    pub name: String,
    /// Name of the tool to invoke, resolved against the tool registry.
    pub tool: String,
    /// Arbitrary JSON inputs passed to the tool handler.
    #[serde(default)]
    pub inputs: Value,
}

impl Plan {
    /// Validates the structural shape of the plan: non-empty steps, unique step
    /// names, and an object-or-null shape for every step's `inputs`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message describing the first violation found.
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("plan must contain at least one step".to_string());
        }
        let mut seen = std::collections::HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err("step name must not be empty".to_string());
            }
            if step.tool.trim().is_empty() {
                return Err(format!("step '{}' must name a tool", step.name));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(format!("duplicate step name '{}'", step.name));
            }
            if !(step.inputs.is_object() || step.inputs.is_null()) {
                return Err(format!("step '{}' inputs must be an object", step.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_empty_plan() {
        let plan = Plan { goal: "hello".into(), steps: vec![], metadata: None };
        assert!(plan.validate_structure().is_err());
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let plan = Plan {
            goal: "hello".into(),
            steps: vec![
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({}) },
                PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({}) },
            ],
            metadata: None,
        };
        assert!(plan.validate_structure().is_err());
    }

    #[test]
    fn accepts_well_formed_plan() {
        let plan = Plan {
            goal: "hello".into(),
            steps: vec![PlanStep { name: "s1".into(), tool: "echo".into(), inputs: json!({"text": "hi"}) }],
            metadata: None,
        };
        assert!(plan.validate_structure().is_ok());
    }
}
