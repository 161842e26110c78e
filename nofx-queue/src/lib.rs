// nofx-queue/src/lib.rs
// ============================================================================
// Crate: nofx-queue
// Description: Queue drivers implementing nofx_core::queue::Queue (§4.B): an
// in-memory driver for single-box mode and tests, a Redis-backed durable
// driver for production.
// ============================================================================

#![forbid(unsafe_code)]

pub mod durable;
pub mod memory;

pub use durable::DurableQueue;
pub use durable::RedisError;
pub use memory::MemoryQueue;

/// Default attempts budget for a job that does not override it (§4.B).
pub const DEFAULT_ATTEMPTS: u32 = 5;
