use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::price::PriceObservation;
use crate::models::target::{Platform, TargetId};

/// Natural identity of a scrape job. Duplicate submissions of the same key
/// collapse into one job; the aggregate holds at most one row per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub target_id: TargetId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}..{}",
            self.target_id, self.check_in, self.check_out
        )
    }
}

/// Lifecycle of a job. Transitions are monotonic: nothing leaves
/// `Completed` or `DeadLettered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered)
    }

    pub fn can_transition(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, InProgress | Completed | DeadLettered) => true,
            (InProgress, Retrying | Completed | DeadLettered) => true,
            (Retrying, InProgress | Completed | DeadLettered) => true,
            _ => false,
        }
    }
}

/// Job payload serialized onto the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub key: JobKey,
    pub url: String,
    pub platform: Platform,
    /// Completed attempts so far; zero for a fresh job.
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl QueuedJob {
    /// Attempt number the next execution will be, 1-based.
    pub fn next_attempt(&self) -> u32 {
        self.attempt + 1
    }
}

/// Terminal outcome reported back through the broker's result channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ScrapeOutcome {
    Priced {
        job: QueuedJob,
        observation: PriceObservation,
    },
    SoldOut {
        job: QueuedJob,
        captured_at: chrono::DateTime<chrono::Utc>,
    },
    DeadLettered {
        job: QueuedJob,
        error: String,
    },
}

impl ScrapeOutcome {
    pub fn job(&self) -> &QueuedJob {
        match self {
            ScrapeOutcome::Priced { job, .. }
            | ScrapeOutcome::SoldOut { job, .. }
            | ScrapeOutcome::DeadLettered { job, .. } => job,
        }
    }
}
