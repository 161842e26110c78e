// nofx-queue/src/durable.rs
// ============================================================================
// Module: Durable Queue
// Description: Redis-backed `Queue` driver (§4.B) for multi-process
// deployments: a priority-ordered sorted set for ready jobs, a time-ordered
// sorted set for delayed jobs, and a list for the DLQ.
// ============================================================================

//! Every key for a topic is hash-tagged (`nofxq:{topic}:...`) so all of a
//! topic's state lands on one Redis Cluster slot. `active`/`completed` are
//! plain counters, not a crash-safe processing log: a worker that dies mid
//! `handle()` leaves its claimed job counted as active forever rather than
//! automatically reclaimed. Acceptable for this driver's scope; a reclaim
//! sweep would need a per-claim heartbeat, which is out of scope here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nofx_core::errors::CoreError;
use nofx_core::queue::DlqEntry;
use nofx_core::queue::EnqueueOptions;
use nofx_core::queue::JobHandler;
use nofx_core::queue::Queue;
use nofx_core::queue::QueueCounts;
use nofx_core::time::Timestamp;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::DEFAULT_ATTEMPTS;

/// How often the background pump promotes delayed jobs and claims waiting
/// ones for a subscribed topic.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on DLQ size per topic; oldest entries are trimmed past this.
const MAX_DLQ_ENTRIES: isize = 1_000;

/// A priority score weight large enough that no realistic `seq` (jobs
/// enqueued in one topic's lifetime) rolls two priority bands into one.
const PRIORITY_SCORE_WEIGHT: f64 = 1e15;

/// Errors from the Redis-backed driver. Every call site converts these into
/// [`CoreError::Transient`] — a Redis outage is always a retryable driver
/// fault here, never a domain error.
#[derive(Debug, Error)]
pub enum RedisError {
    /// The Redis client or connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// A queue envelope read back from Redis did not parse.
    #[error("malformed queue envelope: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<RedisError> for CoreError {
    fn from(err: RedisError) -> Self {
        Self::Transient(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    id: u64,
    payload: Value,
    priority: i32,
    max_attempts: u32,
    attempts_used: u32,
    enqueued_at_ms: i64,
}

fn waiting_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:waiting")
}

fn delayed_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:delayed")
}

fn dlq_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:dlq")
}

fn active_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:active")
}

fn completed_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:completed")
}

fn paused_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:paused")
}

fn seq_key(topic: &str) -> String {
    format!("nofxq:{{{topic}}}:seq")
}

fn priority_score(priority: i32, seq: u64) -> f64 {
    f64::from(priority).mul_add(-PRIORITY_SCORE_WEIGHT, seq as f64)
}

/// Redis-backed [`Queue`] driver, safe to clone: [`ConnectionManager`] shares
/// its underlying connection and reconnects transparently.
#[derive(Clone)]
pub struct DurableQueue {
    conn: ConnectionManager,
}

impl DurableQueue {
    /// Connects to Redis at `redis_url` (e.g. `redis://127.0.0.1/`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the client cannot be constructed
    /// or the initial connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url).map_err(RedisError::from)?;
        let conn = client.get_connection_manager().await.map_err(RedisError::from)?;
        Ok(Self { conn })
    }

    /// Pauses a topic: the pump stops claiming new jobs, active jobs still
    /// run to completion. Administrative operation, not part of [`Queue`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    pub async fn pause(&self, topic: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let () = conn.set(paused_key(topic), "1").await.map_err(RedisError::from)?;
        Ok(())
    }

    /// Resumes a paused topic.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on driver I/O failure.
    pub async fn resume(&self, topic: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let () = conn.set(paused_key(topic), "0").await.map_err(RedisError::from)?;
        Ok(())
    }

    async fn is_paused(&self, topic: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();
        let flag: Option<String> = conn.get(paused_key(topic)).await.map_err(RedisError::from)?;
        Ok(flag.as_deref() == Some("1"))
    }

    /// Moves every delayed job whose ready time has passed into the waiting
    /// set, preserving its original priority.
    async fn promote_ready(&self, topic: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let now = Timestamp::now().unix_millis();
        let ready: Vec<String> = conn
            .zrangebyscore(delayed_key(topic), i64::MIN, now)
            .await
            .map_err(RedisError::from)?;
        for member in ready {
            let removed: i64 = conn.zrem(delayed_key(topic), &member).await.map_err(RedisError::from)?;
            if removed == 0 {
                continue;
            }
            let envelope: Envelope = serde_json::from_str(&member).map_err(RedisError::from)?;
            let score = priority_score(envelope.priority, envelope.id);
            let () = conn.zadd(waiting_key(topic), member, score).await.map_err(RedisError::from)?;
        }
        Ok(())
    }

    async fn claim(&self, topic: &str) -> Result<Option<Envelope>, CoreError> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(waiting_key(topic), 1).await.map_err(RedisError::from)?;
        let Some((member, _score)) = popped.into_iter().next() else { return Ok(None) };
        let mut envelope: Envelope = serde_json::from_str(&member).map_err(RedisError::from)?;
        envelope.attempts_used += 1;
        let _active: i64 = conn.incr(active_key(topic), 1).await.map_err(RedisError::from)?;
        Ok(Some(envelope))
    }

    async fn complete(&self, topic: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _active: i64 = conn.decr(active_key(topic), 1).await.map_err(RedisError::from)?;
        let _completed: i64 = conn.incr(completed_key(topic), 1).await.map_err(RedisError::from)?;
        Ok(())
    }

    async fn fail(&self, topic: &str, envelope: Envelope, err: &CoreError) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _active: i64 = conn.decr(active_key(topic), 1).await.map_err(RedisError::from)?;
        if envelope.attempts_used >= envelope.max_attempts {
            let entry = DlqEntry {
                payload: envelope.payload,
                failed_at: Timestamp::now(),
                last_error: err.to_string(),
                attempts: envelope.attempts_used,
            };
            let json = serde_json::to_string(&entry).map_err(RedisError::from)?;
            let _len: i64 = conn.rpush(dlq_key(topic), json).await.map_err(RedisError::from)?;
            let () = conn.ltrim(dlq_key(topic), -MAX_DLQ_ENTRIES, -1).await.map_err(RedisError::from)?;
            return Ok(());
        }
        let delay = nofx_resilience::backoff::BackoffConfig::default().jittered_delay(envelope.attempts_used);
        let ready_at = Timestamp::now().unix_millis().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        let member = serde_json::to_string(&envelope).map_err(RedisError::from)?;
        let () = conn.zadd(delayed_key(topic), member, ready_at).await.map_err(RedisError::from)?;
        Ok(())
    }

    async fn run_pump(self, topic: String, handler: Arc<dyn JobHandler>) {
        let mut ticker = tokio::time::interval(PUMP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = self.promote_ready(&topic).await {
                warn!(topic = %topic, error = %err, "failed to promote delayed jobs");
                continue;
            }
            match self.is_paused(&topic).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(topic = %topic, error = %err, "failed to read pause flag");
                    continue;
                }
            }
            let envelope = match self.claim(&topic).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(err) => {
                    warn!(topic = %topic, error = %err, "failed to claim waiting job");
                    continue;
                }
            };
            let result = handler.handle(envelope.payload.clone()).await;
            let outcome = match result {
                Ok(()) => self.complete(&topic).await,
                Err(ref err) => {
                    warn!(topic = %topic, attempts_used = envelope.attempts_used, "job delivery failed, applying retry policy");
                    let err = err.to_string();
                    self.fail(&topic, envelope, &CoreError::Transient(err)).await
                }
            };
            if let Err(err) = outcome {
                warn!(topic = %topic, error = %err, "failed to record job outcome");
            }
        }
    }
}

#[async_trait]
impl Queue for DurableQueue {
    async fn enqueue(&self, topic: &str, payload: Value, options: EnqueueOptions) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let seq: u64 = conn.incr(seq_key(topic), 1).await.map_err(RedisError::from)?;
        let priority = options.priority.unwrap_or(0);
        let envelope = Envelope {
            id: seq,
            payload,
            priority,
            max_attempts: options.attempts.unwrap_or(DEFAULT_ATTEMPTS),
            attempts_used: 0,
            enqueued_at_ms: Timestamp::now().unix_millis(),
        };
        let member = serde_json::to_string(&envelope).map_err(RedisError::from)?;
        match options.delay {
            Some(delay) if delay > Duration::ZERO => {
                let ready_at =
                    Timestamp::now().unix_millis().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
                let () = conn.zadd(delayed_key(topic), member, ready_at).await.map_err(RedisError::from)?;
            }
            _ => {
                let score = priority_score(priority, seq);
                let () = conn.zadd(waiting_key(topic), member, score).await.map_err(RedisError::from)?;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn JobHandler>) -> Result<(), CoreError> {
        let queue = self.clone();
        let topic_name = topic.to_string();
        tokio::spawn(queue.run_pump(topic_name, handler));
        Ok(())
    }

    async fn counts(&self, topic: &str) -> Result<QueueCounts, CoreError> {
        let mut conn = self.conn.clone();
        let waiting: u64 = conn.zcard(waiting_key(topic)).await.map_err(RedisError::from)?;
        let delayed: u64 = conn.zcard(delayed_key(topic)).await.map_err(RedisError::from)?;
        let failed: u64 = conn.llen(dlq_key(topic)).await.map_err(RedisError::from)?;
        let active: Option<i64> = conn.get(active_key(topic)).await.map_err(RedisError::from)?;
        let completed: Option<i64> = conn.get(completed_key(topic)).await.map_err(RedisError::from)?;
        let paused = self.is_paused(topic).await?;
        Ok(QueueCounts {
            waiting,
            active: u64::try_from(active.unwrap_or(0)).unwrap_or(0),
            completed: u64::try_from(completed.unwrap_or(0)).unwrap_or(0),
            failed,
            delayed,
            paused,
        })
    }

    async fn oldest_waiting_age_ms(&self, topic: &str) -> Result<Option<u64>, CoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrange(waiting_key(topic), 0, -1).await.map_err(RedisError::from)?;
        let mut oldest: Option<i64> = None;
        for member in &members {
            let envelope: Envelope = serde_json::from_str(member).map_err(RedisError::from)?;
            oldest = Some(oldest.map_or(envelope.enqueued_at_ms, |current| current.min(envelope.enqueued_at_ms)));
        }
        Ok(oldest.map(|enqueued_at_ms| {
            let age = Timestamp::now().unix_millis().saturating_sub(enqueued_at_ms);
            u64::try_from(age).unwrap_or(0)
        }))
    }

    async fn list_dlq(&self, topic: &str, limit: usize) -> Result<Vec<DlqEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let end = isize::try_from(limit).unwrap_or(isize::MAX).saturating_sub(1);
        let raw: Vec<String> = conn.lrange(dlq_key(topic), 0, end).await.map_err(RedisError::from)?;
        raw.iter()
            .map(|json| serde_json::from_str::<DlqEntry>(json).map_err(|err| RedisError::from(err).into()))
            .collect()
    }

    async fn rehydrate_dlq(&self, topic: &str, limit: usize) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        let mut rehydrated = 0u64;
        for _ in 0..limit {
            let popped: Option<String> = conn.lpop(dlq_key(topic), None).await.map_err(RedisError::from)?;
            let Some(json) = popped else { break };
            let entry: DlqEntry = serde_json::from_str(&json).map_err(RedisError::from)?;
            let seq: u64 = conn.incr(seq_key(topic), 1).await.map_err(RedisError::from)?;
            let envelope = Envelope {
                id: seq,
                payload: entry.payload,
                priority: 0,
                max_attempts: DEFAULT_ATTEMPTS,
                attempts_used: 0,
                enqueued_at_ms: Timestamp::now().unix_millis(),
            };
            let member = serde_json::to_string(&envelope).map_err(RedisError::from)?;
            let score = priority_score(0, seq);
            let () = conn.zadd(waiting_key(topic), member, score).await.map_err(RedisError::from)?;
            rehydrated += 1;
        }
        Ok(rehydrated)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test-only assertions")]

    use super::*;

    #[test]
    fn priority_score_orders_high_priority_below_low_priority() {
        let high = priority_score(10, 1);
        let low = priority_score(0, 1);
        assert!(high < low, "higher priority must sort first under ZPOPMIN's ascending order");
    }

    #[test]
    fn priority_score_breaks_ties_by_sequence_within_a_priority_band() {
        let first = priority_score(5, 1);
        let second = priority_score(5, 2);
        assert!(first < second);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope {
            id: 7,
            payload: serde_json::json!({ "runId": "r1" }),
            priority: 3,
            max_attempts: 5,
            attempts_used: 1,
            enqueued_at_ms: 1_000,
        };
        let json = serde_json::to_string(&envelope).expect("serialize");
        let back: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, envelope.id);
        assert_eq!(back.priority, envelope.priority);
    }
}
