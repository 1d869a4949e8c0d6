//! Durable FIFO job queue with at-least-once delivery.
//!
//! A dequeued job stays in a processing set until it is acknowledged; if the
//! worker dies first, `reclaim_expired` makes the job visible again after the
//! visibility timeout. Redelivery means the same window can be fetched twice,
//! which is why the aggregate upsert is idempotent. Delayed re-enqueue backs
//! retry scheduling, and a result channel carries terminal outcomes back to
//! the producer.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::job::{QueuedJob, ScrapeOutcome};

const QUEUE_KEY: &str = "roomwatch:jobs";
const PROCESSING_KEY: &str = "roomwatch:processing";
const CLAIMS_KEY: &str = "roomwatch:claims";
const DELAYED_KEY: &str = "roomwatch:delayed";
const RESULTS_KEY: &str = "roomwatch:results";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Work queue contract shared by the Redis broker and the in-process one.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a job to the ready queue.
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Schedule a job to become ready after `delay` (retry backoff and
    /// cadence deferrals).
    async fn enqueue_delayed(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError>;

    /// Claim the next ready job. The job is moved into the processing set
    /// and stays there until `ack`; it is not lost if the caller dies.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError>;

    /// Acknowledge a claimed job, removing it from the processing set.
    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Move delayed jobs whose time has come into the ready queue.
    async fn promote_due(&self) -> Result<u64, QueueError>;

    /// Return claimed-but-unacknowledged jobs older than `visibility` to the
    /// ready queue. This is the redelivery path for crashed workers.
    async fn reclaim_expired(&self, visibility: Duration) -> Result<u64, QueueError>;

    /// Ready jobs currently queued.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Publish a terminal outcome for the producer to aggregate.
    async fn push_result(&self, outcome: &ScrapeOutcome) -> Result<(), QueueError>;

    /// Pop the next terminal outcome, if any.
    async fn next_result(&self) -> Result<Option<ScrapeOutcome>, QueueError>;
}

// ───────────────────────── Redis broker ─────────────────────────

/// Redis-backed broker: ready list + processing list, claim timestamps in a
/// hash, delayed jobs in a sorted set scored by eligibility time, results on
/// a separate list. Safe for any number of worker processes.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Check Redis connectivity (run-fatal when the broker is unreachable).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn enqueue_delayed(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        let eligible_at = Self::now_ms() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &payload, eligible_at)
            .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;
        match payload {
            Some(payload) => {
                conn.hset::<_, _, _, ()>(CLAIMS_KEY, &payload, Self::now_ms())
                    .await?;
                let job: QueuedJob = serde_json::from_str(&payload)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        conn.hdel::<_, _, ()>(CLAIMS_KEY, &payload).await?;
        Ok(())
    }

    async fn promote_due(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let due: Vec<String> = conn
            .zrangebyscore(DELAYED_KEY, i64::MIN, Self::now_ms())
            .await?;
        let mut promoted = 0;
        for payload in due {
            // zrem guards the race with another promoter: only the caller
            // that actually removed the member may enqueue it.
            let removed: i64 = conn.zrem(DELAYED_KEY, &payload).await?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn reclaim_expired(&self, visibility: Duration) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let claims: HashMap<String, i64> = conn.hgetall(CLAIMS_KEY).await?;
        let cutoff = Self::now_ms() - visibility.as_millis() as i64;
        let mut reclaimed = 0;
        for (payload, claimed_at) in claims {
            if claimed_at > cutoff {
                continue;
            }
            let removed: i64 = conn.lrem(PROCESSING_KEY, 1, &payload).await?;
            conn.hdel::<_, _, ()>(CLAIMS_KEY, &payload).await?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn push_result(&self, outcome: &ScrapeOutcome) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(outcome)?;
        conn.lpush::<_, _, ()>(RESULTS_KEY, &payload).await?;
        Ok(())
    }

    async fn next_result(&self) -> Result<Option<ScrapeOutcome>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.rpop(RESULTS_KEY, None).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

// ──────────────────────── In-process broker ────────────────────────

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<String>,
    delayed: Vec<(Instant, String)>,
    claims: HashMap<String, Instant>,
    results: VecDeque<String>,
}

/// In-process broker with the same semantics as the Redis one, used when no
/// `REDIS_URL` is configured and throughout the test suite. Payloads are
/// stored serialized so acknowledgement matches by payload equality exactly
/// like the Redis `LREM` path.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker::default()
    }

    /// Jobs currently claimed and unacknowledged.
    pub fn claimed(&self) -> usize {
        self.state.lock().expect("broker lock poisoned").claims.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut state = self.state.lock().expect("broker lock poisoned");
        state.ready.push_back(payload);
        Ok(())
    }

    async fn enqueue_delayed(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut state = self.state.lock().expect("broker lock poisoned");
        state.delayed.push((Instant::now() + delay, payload));
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.state.lock().expect("broker lock poisoned");
        match state.ready.pop_front() {
            Some(payload) => {
                state.claims.insert(payload.clone(), Instant::now());
                let job: QueuedJob = serde_json::from_str(&payload)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut state = self.state.lock().expect("broker lock poisoned");
        state.claims.remove(&payload);
        Ok(())
    }

    async fn promote_due(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().expect("broker lock poisoned");
        let now = Instant::now();
        let mut promoted = 0;
        let delayed = std::mem::take(&mut state.delayed);
        for (eligible_at, payload) in delayed {
            if eligible_at <= now {
                state.ready.push_back(payload);
                promoted += 1;
            } else {
                state.delayed.push((eligible_at, payload));
            }
        }
        Ok(promoted)
    }

    async fn reclaim_expired(&self, visibility: Duration) -> Result<u64, QueueError> {
        let mut state = self.state.lock().expect("broker lock poisoned");
        let now = Instant::now();
        let expired: Vec<String> = state
            .claims
            .iter()
            .filter(|(_, claimed_at)| now.duration_since(**claimed_at) >= visibility)
            .map(|(payload, _)| payload.clone())
            .collect();
        for payload in &expired {
            state.claims.remove(payload);
            state.ready.push_back(payload.clone());
        }
        Ok(expired.len() as u64)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().expect("broker lock poisoned");
        Ok(state.ready.len() as u64)
    }

    async fn push_result(&self, outcome: &ScrapeOutcome) -> Result<(), QueueError> {
        let payload = serde_json::to_string(outcome)?;
        let mut state = self.state.lock().expect("broker lock poisoned");
        state.results.push_back(payload);
        Ok(())
    }

    async fn next_result(&self) -> Result<Option<ScrapeOutcome>, QueueError> {
        let mut state = self.state.lock().expect("broker lock poisoned");
        match state.results.pop_front() {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
