//! Aggregation of terminal job outcomes into the output dataset.
//!
//! The ledger is seeded with every expected job key before workers start.
//! At-least-once delivery means the same key can report twice; upserts are
//! idempotent (a newer observation for a key replaces the older one, a
//! duplicate never becomes a second row) and status transitions are
//! monotonic, so nothing leaves a terminal state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::models::job::{JobKey, JobStatus, ScrapeOutcome};
use crate::models::price::{PriceObservation, RowStatus, ScrapeResult};

#[derive(Debug, Clone)]
enum RowOutcome {
    Priced(PriceObservation),
    SoldOut { captured_at: DateTime<Utc> },
    Error(String),
}

#[derive(Debug, Clone)]
struct LedgerRow {
    target_url: String,
    status: JobStatus,
    outcome: Option<RowOutcome>,
    attempts: u32,
}

/// Per-target statistics over successfully priced windows.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub target_url: String,
    pub priced: usize,
    pub sold_out: usize,
    pub errors: usize,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub mean_price: Option<f64>,
}

/// The run's result set, keyed by job identity.
pub struct RunLedger {
    group: Option<String>,
    rows: HashMap<JobKey, LedgerRow>,
}

impl RunLedger {
    pub fn new(group: Option<String>) -> RunLedger {
        RunLedger {
            group,
            rows: HashMap::new(),
        }
    }

    /// Register a job the run is waiting for. Duplicate keys collapse.
    pub fn expect(&mut self, key: JobKey, target_url: &str) {
        self.rows.entry(key).or_insert(LedgerRow {
            target_url: target_url.to_string(),
            status: JobStatus::Pending,
            outcome: None,
            attempts: 0,
        });
    }

    pub fn expected(&self) -> usize {
        self.rows.len()
    }

    pub fn pending(&self) -> usize {
        self.rows
            .values()
            .filter(|row| !row.status.is_terminal())
            .count()
    }

    /// Whether every expected job has reached a terminal state. The output
    /// artifact is only emitted once this holds.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Fold one terminal outcome into the ledger.
    ///
    /// Redelivery can report the same key several times and out of order.
    /// A capture (priced or sold-out) replaces the recorded one only when it
    /// was taken later; a dead letter never displaces a capture, and nothing
    /// displaces a dead letter.
    pub fn record(&mut self, outcome: ScrapeOutcome) {
        let job = outcome.job().clone();
        let Some(row) = self.rows.get_mut(&job.key) else {
            warn!(key = %job.key, "outcome for a key this run never expected, dropping");
            return;
        };
        row.attempts = row.attempts.max(job.next_attempt());

        match outcome {
            ScrapeOutcome::Priced { observation, .. } => {
                if Self::accepts_capture(row, observation.captured_at) {
                    row.status = JobStatus::Completed;
                    row.outcome = Some(RowOutcome::Priced(observation));
                }
            }
            ScrapeOutcome::SoldOut { captured_at, .. } => {
                if Self::accepts_capture(row, captured_at) {
                    row.status = JobStatus::Completed;
                    row.outcome = Some(RowOutcome::SoldOut { captured_at });
                }
            }
            ScrapeOutcome::DeadLettered { error, .. } => {
                if row.status.can_transition(JobStatus::DeadLettered) {
                    row.status = JobStatus::DeadLettered;
                    row.outcome = Some(RowOutcome::Error(error));
                }
            }
        }
    }

    /// Whether a capture taken at `captured_at` may replace the row's
    /// current outcome. Re-recording a completed row is the duplicate
    /// upsert path and is allowed only for a strictly newer capture.
    fn accepts_capture(row: &LedgerRow, captured_at: DateTime<Utc>) -> bool {
        if row.status != JobStatus::Completed && !row.status.can_transition(JobStatus::Completed) {
            return false;
        }
        match &row.outcome {
            Some(RowOutcome::Priced(existing)) => captured_at > existing.captured_at,
            Some(RowOutcome::SoldOut {
                captured_at: existing,
            }) => captured_at > *existing,
            Some(RowOutcome::Error(_)) => false,
            None => true,
        }
    }

    /// Final rows, one per key, ordered by target then check-in.
    pub fn results(&self) -> Vec<ScrapeResult> {
        let mut rows: Vec<(&JobKey, &LedgerRow)> = self.rows.iter().collect();
        rows.sort_by(|(ka, ra), (kb, rb)| {
            (&ra.target_url, ka.check_in).cmp(&(&rb.target_url, kb.check_in))
        });

        rows.into_iter()
            .map(|(key, row)| {
                let (status, amount, currency, room_name, error) = match &row.outcome {
                    Some(RowOutcome::Priced(obs)) => (
                        RowStatus::Priced,
                        Some(obs.amount),
                        Some(obs.currency.code()),
                        obs.room_name.clone(),
                        None,
                    ),
                    Some(RowOutcome::SoldOut { .. }) => {
                        (RowStatus::SoldOut, None, None, None, None)
                    }
                    Some(RowOutcome::Error(e)) => {
                        (RowStatus::Error, None, None, None, Some(e.clone()))
                    }
                    None => (
                        RowStatus::Error,
                        None,
                        None,
                        None,
                        Some("job never reached a terminal state".to_string()),
                    ),
                };
                ScrapeResult {
                    target_url: row.target_url.clone(),
                    check_in: key.check_in,
                    check_out: key.check_out,
                    status,
                    amount,
                    currency,
                    room_name,
                    attempts: row.attempts,
                    error,
                    group: self.group.clone(),
                }
            })
            .collect()
    }

    /// Min/max/mean per target across priced windows. Meaningful once
    /// `is_complete()`; callers are expected to wait for that.
    pub fn summaries(&self) -> Vec<TargetSummary> {
        let mut by_target: HashMap<&str, TargetSummary> = HashMap::new();
        for row in self.rows.values() {
            let entry = by_target
                .entry(row.target_url.as_str())
                .or_insert_with(|| TargetSummary {
                    target_url: row.target_url.clone(),
                    priced: 0,
                    sold_out: 0,
                    errors: 0,
                    min_price: None,
                    max_price: None,
                    mean_price: None,
                });
            match &row.outcome {
                Some(RowOutcome::Priced(obs)) => {
                    entry.priced += 1;
                    entry.min_price =
                        Some(entry.min_price.map_or(obs.amount, |m| m.min(obs.amount)));
                    entry.max_price =
                        Some(entry.max_price.map_or(obs.amount, |m| m.max(obs.amount)));
                }
                Some(RowOutcome::SoldOut { .. }) => entry.sold_out += 1,
                Some(RowOutcome::Error(_)) | None => entry.errors += 1,
            }
        }

        for summary in by_target.values_mut() {
            if summary.priced > 0 {
                let total: f64 = self
                    .rows
                    .values()
                    .filter(|r| r.target_url == summary.target_url)
                    .filter_map(|r| match &r.outcome {
                        Some(RowOutcome::Priced(obs)) => Some(obs.amount),
                        _ => None,
                    })
                    .sum();
                summary.mean_price = Some(total / summary.priced as f64);
            }
        }

        let mut summaries: Vec<TargetSummary> = by_target.into_values().collect();
        summaries.sort_by(|a, b| a.target_url.cmp(&b.target_url));
        summaries
    }

    /// Write the tabular artifact.
    pub fn write_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in self.results() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
