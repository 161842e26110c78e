// nofx-queue/src/memory.rs
// ============================================================================
// Module: Memory Queue
// Description: In-process `Queue` driver (§4.B) for single-box mode and
// tests: a FIFO ready list per topic, a min-heap of delayed jobs, and a
// bounded ring-buffer DLQ.
// ============================================================================

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use nofx_core::errors::CoreError;
use nofx_core::queue::DlqEntry;
use nofx_core::queue::EnqueueOptions;
use nofx_core::queue::JobHandler;
use nofx_core::queue::Queue;
use nofx_core::queue::QueueCounts;
use nofx_core::time::Timestamp;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::DEFAULT_ATTEMPTS;

/// Bound on DLQ size per topic; oldest entries are dropped past this.
const MAX_DLQ_ENTRIES: usize = 1_000;

/// How often the background pump checks for ready delayed jobs and, if a
/// handler is subscribed, claims the next waiting job.
const PUMP_INTERVAL: Duration = Duration::from_millis(25);

struct Job {
    payload: Value,
    max_attempts: u32,
    attempts_used: u32,
    priority: i32,
    enqueued_at: Instant,
}

struct DelayedJob {
    ready_at: Instant,
    job: Job,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest ready_at sorts first.
        other.ready_at.cmp(&self.ready_at)
    }
}

#[derive(Default)]
struct TopicState {
    waiting: VecDeque<Job>,
    delayed: BinaryHeap<DelayedJob>,
    dlq: VecDeque<DlqEntry>,
    active: u64,
    completed: u64,
    paused: bool,
    handler: Option<Arc<dyn JobHandler>>,
    pump_spawned: bool,
}

fn len_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn insert_by_priority(waiting: &mut VecDeque<Job>, job: Job) {
    let pos = waiting.iter().position(|existing| existing.priority < job.priority).unwrap_or(waiting.len());
    waiting.insert(pos, job);
}

fn promote_ready(state: &mut TopicState) {
    let now = Instant::now();
    loop {
        match state.delayed.peek() {
            Some(top) if top.ready_at <= now => {
                if let Some(DelayedJob { job, .. }) = state.delayed.pop() {
                    insert_by_priority(&mut state.waiting, job);
                }
            }
            _ => break,
        }
    }
}

fn requeue_or_dead_letter(state: &mut TopicState, job: Job, err: &CoreError) {
    if job.attempts_used >= job.max_attempts {
        state.dlq.push_back(DlqEntry {
            payload: job.payload,
            failed_at: Timestamp::now(),
            last_error: err.to_string(),
            attempts: job.attempts_used,
        });
        if state.dlq.len() > MAX_DLQ_ENTRIES {
            state.dlq.pop_front();
        }
        return;
    }
    let delay = nofx_resilience::backoff::BackoffConfig::default().jittered_delay(job.attempts_used);
    state.delayed.push(DelayedJob { ready_at: Instant::now() + delay, job });
}

async fn run_pump(topics: Arc<Mutex<HashMap<String, TopicState>>>, topic: String) {
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    loop {
        ticker.tick().await;
        let claim = {
            let mut guard = topics.lock().await;
            let Some(state) = guard.get_mut(&topic) else { return };
            promote_ready(state);
            if state.paused {
                None
            } else if let Some(handler) = state.handler.clone() {
                state.waiting.pop_front().map(|job| (job, handler))
            } else {
                None
            }
        };
        let Some((mut job, handler)) = claim else { continue };
        job.attempts_used += 1;
        {
            let mut guard = topics.lock().await;
            if let Some(state) = guard.get_mut(&topic) {
                state.active += 1;
            }
        }
        let result = handler.handle(job.payload.clone()).await;
        let mut guard = topics.lock().await;
        let Some(state) = guard.get_mut(&topic) else { return };
        state.active = state.active.saturating_sub(1);
        match result {
            Ok(()) => state.completed += 1,
            Err(err) => {
                warn!(topic = %topic, attempts_used = job.attempts_used, "job delivery failed, applying retry policy");
                requeue_or_dead_letter(state, job, &err);
            }
        }
    }
}

/// In-process [`Queue`] (§4.B): one [`TopicState`] per topic name, guarded by
/// a single async mutex. Subscribing spawns one background pump task per
/// topic, which both promotes ready delayed jobs and claims/dispatches work.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses a topic: the pump stops claiming new jobs, existing active jobs
    /// still run to completion. Administrative operation, not part of the
    /// driver-agnostic [`Queue`] trait.
    pub async fn pause(&self, topic: &str) {
        let mut topics = self.topics.lock().await;
        topics.entry(topic.to_string()).or_default().paused = true;
    }

    /// Resumes a paused topic.
    pub async fn resume(&self, topic: &str) {
        let mut topics = self.topics.lock().await;
        topics.entry(topic.to_string()).or_default().paused = false;
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, topic: &str, payload: Value, options: EnqueueOptions) -> Result<(), CoreError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        let job = Job {
            payload,
            max_attempts: options.attempts.unwrap_or(DEFAULT_ATTEMPTS),
            attempts_used: 0,
            priority: options.priority.unwrap_or(0),
            enqueued_at: Instant::now(),
        };
        match options.delay {
            Some(delay) if delay > Duration::ZERO => {
                state.delayed.push(DelayedJob { ready_at: Instant::now() + delay, job });
            }
            _ => insert_by_priority(&mut state.waiting, job),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn JobHandler>) -> Result<(), CoreError> {
        let spawn = {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_string()).or_default();
            state.handler = Some(handler);
            let already_spawned = state.pump_spawned;
            state.pump_spawned = true;
            !already_spawned
        };
        if spawn {
            let topics = Arc::clone(&self.topics);
            let topic_name = topic.to_string();
            tokio::spawn(run_pump(topics, topic_name));
        }
        Ok(())
    }

    async fn counts(&self, topic: &str) -> Result<QueueCounts, CoreError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        Ok(QueueCounts {
            waiting: len_u64(state.waiting.len()),
            active: state.active,
            completed: state.completed,
            failed: len_u64(state.dlq.len()),
            delayed: len_u64(state.delayed.len()),
            paused: state.paused,
        })
    }

    async fn oldest_waiting_age_ms(&self, topic: &str) -> Result<Option<u64>, CoreError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        Ok(state.waiting.front().map(|job| {
            let elapsed = job.enqueued_at.elapsed().as_millis();
            u64::try_from(elapsed).unwrap_or(u64::MAX)
        }))
    }

    async fn list_dlq(&self, topic: &str, limit: usize) -> Result<Vec<DlqEntry>, CoreError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        Ok(state.dlq.iter().take(limit).cloned().collect())
    }

    async fn rehydrate_dlq(&self, topic: &str, limit: usize) -> Result<u64, CoreError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        let mut rehydrated = 0u64;
        for _ in 0..limit {
            let Some(entry) = state.dlq.pop_front() else { break };
            state.waiting.push_back(Job {
                payload: entry.payload,
                max_attempts: DEFAULT_ATTEMPTS,
                attempts_used: 0,
                priority: 0,
                enqueued_at: Instant::now(),
            });
            rehydrated += 1;
        }
        Ok(rehydrated)
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "test-only assertions"
    )]

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering as AtomicOrdering;

    use serde_json::json;

    use super::*;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_first_n: usize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _payload: Value) -> Result<(), CoreError> {
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.fail_first_n {
                return Err(CoreError::Transient("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_and_subscribe_delivers_the_job() {
        let queue = MemoryQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: Arc::clone(&calls), fail_first_n: 0 });
        queue.enqueue("t", json!({ "n": 1 }), EnqueueOptions::default()).await.expect("enqueue");
        queue.subscribe("t", handler).await.expect("subscribe");

        for _ in 0..50 {
            if calls.load(AtomicOrdering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        let counts = queue.counts("t").await.expect("counts");
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn failed_job_retries_then_eventually_dead_letters() {
        let queue = MemoryQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: Arc::clone(&calls), fail_first_n: 100 });
        queue
            .enqueue("t", json!({ "n": 1 }), EnqueueOptions { attempts: Some(2), ..EnqueueOptions::default() })
            .await
            .expect("enqueue");
        queue.subscribe("t", handler).await.expect("subscribe");

        for _ in 0..200 {
            let dlq = queue.list_dlq("t", 10).await.expect("list dlq");
            if !dlq.is_empty() {
                assert_eq!(dlq[0].attempts, 2);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job was never dead-lettered");
    }

    #[tokio::test]
    async fn priority_orders_ready_jobs_before_lower_priority_ones() {
        let queue = MemoryQueue::new();
        queue
            .enqueue("t", json!({ "n": "low" }), EnqueueOptions::default())
            .await
            .expect("enqueue low");
        queue
            .enqueue("t", json!({ "n": "high" }), EnqueueOptions { priority: Some(10), ..EnqueueOptions::default() })
            .await
            .expect("enqueue high");

        let topics = queue.topics.lock().await;
        let state = topics.get("t").expect("topic state");
        assert_eq!(state.waiting.front().expect("front").payload, json!({ "n": "high" }));
    }

    #[tokio::test]
    async fn rehydrate_dlq_moves_entries_back_to_waiting() {
        let queue = MemoryQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler { calls: Arc::clone(&calls), fail_first_n: 100 });
        queue
            .enqueue("t", json!({ "n": 1 }), EnqueueOptions { attempts: Some(1), ..EnqueueOptions::default() })
            .await
            .expect("enqueue");
        queue.subscribe("t", handler).await.expect("subscribe");

        for _ in 0..200 {
            if !queue.list_dlq("t", 10).await.expect("list dlq").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let rehydrated = queue.rehydrate_dlq("t", 10).await.expect("rehydrate");
        assert_eq!(rehydrated, 1);
        let counts = queue.counts("t").await.expect("counts");
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting, 1);
    }
}
