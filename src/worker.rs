//! Job execution loop.
//!
//! Each worker independently pulls jobs from the shared broker and drives
//! them through `Claimed → SessionAcquired → Navigated/Rendered → Extracted`
//! into an acknowledged terminal outcome, a delayed retry, or a dead letter.
//! Retry scheduling rides on the queue's delayed redelivery rather than on
//! in-loop sleeping; the only deliberate waits are the dispatch jitter and
//! the render stabilization inside the session.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::models::job::{QueuedJob, ScrapeOutcome};
use crate::models::price::PriceObservation;
use crate::services::extract::{extractor_for, ExtractError, Extraction};
use crate::services::limiter::{DispatchGate, Reservation};
use crate::services::queue::{Broker, QueueError};
use crate::services::session::{FetchError, SessionManager};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Total attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// Tighter budget for unparseable content, which rarely heals on retry.
    pub extraction_attempts: u32,
    pub backoff_base: Duration,
    /// Anti-bot detections back off much longer than transient network
    /// failures; hammering a site that just flagged us makes it worse.
    pub antibot_backoff_base: Duration,
    pub backoff_cap: Duration,
    pub visibility_timeout: Duration,
    /// Cadence waits up to this long are slept inline (the jitter delay
    /// before navigation); longer deferrals go back through the queue.
    pub inline_wait_cap: Duration,
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> WorkerConfig {
        WorkerConfig {
            max_attempts: 4,
            extraction_attempts: 2,
            backoff_base: Duration::from_millis(500),
            antibot_backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(300),
            visibility_timeout: Duration::from_secs(120),
            inline_wait_cap: Duration::from_secs(6),
            idle_poll: Duration::from_millis(250),
        }
    }
}

/// Failure classes a single attempt can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    AntiBot,
    Extraction,
}

struct AttemptFailure {
    kind: FailureKind,
    message: String,
}

impl AttemptFailure {
    fn from_fetch(e: FetchError) -> AttemptFailure {
        let kind = if e.is_antibot() {
            FailureKind::AntiBot
        } else {
            FailureKind::Network
        };
        AttemptFailure {
            kind,
            message: e.to_string(),
        }
    }

    fn from_extract(e: ExtractError) -> AttemptFailure {
        AttemptFailure {
            kind: FailureKind::Extraction,
            message: e.to_string(),
        }
    }
}

/// Delay before the next attempt: exponential in the attempt number with
/// up to 25% additive jitter, capped. Anti-bot failures use their own, much
/// longer base.
pub fn backoff_for(kind: FailureKind, attempt: u32, cfg: &WorkerConfig) -> Duration {
    let base = match kind {
        FailureKind::AntiBot => cfg.antibot_backoff_base,
        FailureKind::Network | FailureKind::Extraction => cfg.backoff_base,
    };
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(cfg.backoff_cap);
    let jitter_ms = (capped.as_millis() as u64) / 4;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    };
    capped.saturating_add(jitter).min(cfg.backoff_cap.saturating_mul(2))
}

pub struct Worker {
    pub id: usize,
    broker: Arc<dyn Broker>,
    gate: Arc<DispatchGate>,
    sessions: SessionManager,
    cfg: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn Broker>,
        gate: Arc<DispatchGate>,
        sessions: SessionManager,
        cfg: WorkerConfig,
    ) -> Worker {
        Worker {
            id,
            broker,
            gate,
            sessions,
            cfg,
        }
    }

    /// Pull and process jobs until the shutdown flag flips. Per-job failures
    /// are absorbed into the retry budget; only broker failures escape.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.step().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "broker unavailable, stopping worker");
                    break;
                }
            }
        }
        info!(worker = self.id, "worker stopped");
    }

    /// Process at most one job. Returns Ok(false) when the queue was empty.
    pub async fn step(&mut self) -> Result<bool, QueueError> {
        self.broker.promote_due().await?;
        self.broker.reclaim_expired(self.cfg.visibility_timeout).await?;

        let Some(job) = self.broker.dequeue().await? else {
            return Ok(false);
        };

        // Jitter delay before navigation: short waits are slept here (this
        // is the worker's deliberate suspension point), long deferrals are
        // pushed back through the queue so the claim is not held open.
        loop {
            match self.gate.reserve(&job.key.target_id) {
                Reservation::Ready => break,
                Reservation::Wait(delay) if delay <= self.cfg.inline_wait_cap => {
                    debug!(worker = self.id, key = %job.key, ?delay, "pacing dispatch");
                    tokio::time::sleep(delay).await;
                }
                Reservation::Wait(delay) => {
                    self.broker.enqueue_delayed(&job, delay).await?;
                    self.broker.ack(&job).await?;
                    return Ok(true);
                }
            }
        }

        debug!(worker = self.id, key = %job.key, attempt = job.next_attempt(), "processing job");

        match self.attempt(&job).await {
            Ok(outcome) => {
                self.broker.push_result(&outcome).await?;
                self.broker.ack(&job).await?;
                self.gate.release(&job.key);
                metrics::counter!("roomwatch_jobs_completed").increment(1);
                info!(worker = self.id, key = %job.key, "job completed");
            }
            Err(failure) => {
                let budget = match failure.kind {
                    FailureKind::Extraction => self.cfg.extraction_attempts,
                    _ => self.cfg.max_attempts,
                };
                if job.next_attempt() < budget {
                    let delay = backoff_for(failure.kind, job.attempt, &self.cfg);
                    let mut retry = job.clone();
                    retry.attempt += 1;
                    retry.last_error = Some(failure.message.clone());
                    warn!(
                        worker = self.id,
                        key = %job.key,
                        attempt = job.next_attempt(),
                        ?delay,
                        error = %failure.message,
                        "attempt failed, retrying"
                    );
                    self.broker.enqueue_delayed(&retry, delay).await?;
                    self.broker.ack(&job).await?;
                } else {
                    warn!(
                        worker = self.id,
                        key = %job.key,
                        attempts = job.next_attempt(),
                        error = %failure.message,
                        "retry budget exhausted, dead-lettering"
                    );
                    self.broker
                        .push_result(&ScrapeOutcome::DeadLettered {
                            job: job.clone(),
                            error: failure.message,
                        })
                        .await?;
                    self.broker.ack(&job).await?;
                    self.gate.release(&job.key);
                    metrics::counter!("roomwatch_jobs_dead_lettered").increment(1);
                }
            }
        }
        Ok(true)
    }

    /// One attempt: acquire session, navigate, render, extract.
    async fn attempt(&mut self, job: &QueuedJob) -> Result<ScrapeOutcome, AttemptFailure> {
        let html = self
            .sessions
            .fetch(&job.url)
            .await
            .map_err(AttemptFailure::from_fetch)?;

        let extractor = extractor_for(job.platform);
        match extractor.extract(&html).map_err(AttemptFailure::from_extract)? {
            Extraction::Found {
                amount,
                currency,
                room_name,
                source_text,
            } => Ok(ScrapeOutcome::Priced {
                job: job.clone(),
                observation: PriceObservation {
                    key: job.key.clone(),
                    amount,
                    currency,
                    room_name,
                    captured_at: chrono::Utc::now(),
                    raw_snippet: source_text,
                },
            }),
            Extraction::SoldOut => Ok(ScrapeOutcome::SoldOut {
                job: job.clone(),
                captured_at: chrono::Utc::now(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WorkerConfig {
        WorkerConfig {
            backoff_base: Duration::from_millis(100),
            antibot_backoff_base: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(60),
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn backoff_grows_exponentially_until_the_cap() {
        let cfg = cfg();
        let b0 = backoff_for(FailureKind::Network, 0, &cfg);
        let b3 = backoff_for(FailureKind::Network, 3, &cfg);
        assert!(b0 >= Duration::from_millis(100));
        assert!(b3 >= Duration::from_millis(800));
        let b20 = backoff_for(FailureKind::Network, 20, &cfg);
        assert!(b20 <= Duration::from_secs(120));
    }

    #[test]
    fn antibot_backoff_dwarfs_network_backoff() {
        let cfg = cfg();
        let network = backoff_for(FailureKind::Network, 0, &cfg);
        let antibot = backoff_for(FailureKind::AntiBot, 0, &cfg);
        assert!(antibot >= network * 10);
    }

    #[test]
    fn jitter_only_adds_never_subtracts() {
        let cfg = cfg();
        for attempt in 0..5 {
            let floor = Duration::from_millis(100) * (1 << attempt);
            for _ in 0..16 {
                let d = backoff_for(FailureKind::Network, attempt, &cfg);
                assert!(d >= floor.min(cfg.backoff_cap));
            }
        }
    }
}
