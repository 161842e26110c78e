// nofx-runner/src/lib.rs
// ============================================================================
// Crate: nofx-runner
// Description: Plan submission, the Step Runner (§4.D), Run Recovery (§4.E),
// the Outbox Relay (§4.C), and the worker loop that wires queue deliveries
// to `run_step` (§4.D.1).
// ============================================================================

//! Everything here is written against `Arc<dyn Store>` / `Arc<dyn Queue>` and
//! never against a concrete driver, so the same code runs over the
//! in-memory/FS pair in tests and the Redis/SQLite pair in production.
//!
//! Plan sequencing (resolved open question, recorded in full in
//! `DESIGN.md`): a plan's steps are materialised up front, all `pending`, in
//! plan order. `submit_plan` enqueues only the first. `StepRunner::run_step`
//! enqueues the next `pending` step in plan order after a step reaches
//! `succeeded`; a `failed` or `timed_out` step ends the run instead of
//! advancing. This mirrors the teacher engine's `ControlPlane::start_run`
//! dispatching only the initial stage's packets and leaving later stages to
//! be driven by subsequent trigger evaluations, generalised from "one active
//! stage at a time" to "one active step at a time."

#![forbid(unsafe_code)]

pub mod plan;
pub mod recovery;
pub mod relay;
pub mod runner;
pub mod worker;

pub use plan::submit_plan;
pub use plan::SubmitPlanError;
pub use recovery::resume_run;
pub use recovery::retry_step;
pub use recovery::RecoveryError;
pub use relay::spawn_outbox_relay;
pub use relay::OutboxRelay;
pub use runner::StepRunner;
pub use worker::spawn_step_workers;
pub use worker::StepReadyHandler;
