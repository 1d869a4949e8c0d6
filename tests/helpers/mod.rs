//! Test helper utilities for pipeline tests: scripted session doubles and
//! builders tuned for fast in-process runs.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomwatch::models::job::{JobKey, QueuedJob};
use roomwatch::models::target::{Platform, TargetId};
use roomwatch::services::limiter::{DispatchGate, GateConfig};
use roomwatch::services::session::{FetchError, PageSession, SessionFactory, SessionManager};
use roomwatch::worker::WorkerConfig;

/// Session that replays a fixed list of fetch outcomes, then serves the
/// fallback page for every further fetch.
pub struct ScriptedSession {
    outcomes: VecDeque<Result<String, FetchError>>,
    fallback: &'static str,
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn fetch(&mut self, _url: &str) -> Result<String, FetchError> {
        match self.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.fallback.to_string()),
        }
    }
}

/// Factory handing out one scripted session per `open` call, counting opens
/// so tests can assert on rotation behavior.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<VecDeque<Result<String, FetchError>>>>,
    fallback: &'static str,
    opened: Arc<AtomicU32>,
}

impl SessionFactory for ScriptedFactory {
    fn open(&self) -> Result<Box<dyn PageSession>, FetchError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().expect("script lock poisoned");
        let outcomes = scripts.pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedSession {
            outcomes,
            fallback: self.fallback,
        }))
    }
}

/// Build a `SessionManager` over scripted sessions. Each inner vec scripts
/// one session's fetches in order; sessions past the script (and fetches
/// past a session's script) serve `fallback`. Returns the manager and a
/// counter of sessions opened.
pub fn scripted_sessions(
    scripts: Vec<Vec<Result<String, FetchError>>>,
    fallback: &'static str,
    rotate_after: u32,
) -> (SessionManager, Arc<AtomicU32>) {
    let opened = Arc::new(AtomicU32::new(0));
    let factory = ScriptedFactory {
        scripts: Mutex::new(scripts.into_iter().map(VecDeque::from).collect()),
        fallback,
        opened: Arc::clone(&opened),
    };
    (SessionManager::new(Box::new(factory), rotate_after), opened)
}

pub fn antibot() -> Result<String, FetchError> {
    Err(FetchError::AntiBot("captcha"))
}

pub fn network_timeout(url: &str) -> Result<String, FetchError> {
    Err(FetchError::Timeout(url.to_string()))
}

/// Gate with no pacing so tests never stall on cadence.
pub fn open_gate() -> Arc<DispatchGate> {
    Arc::new(DispatchGate::new(GateConfig {
        min_interval: Duration::ZERO,
        max_interval: Duration::ZERO,
    }))
}

/// Worker config with millisecond backoffs so retry chains finish fast.
pub fn fast_worker_cfg() -> WorkerConfig {
    WorkerConfig {
        max_attempts: 4,
        extraction_attempts: 2,
        backoff_base: Duration::from_millis(1),
        antibot_backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(20),
        visibility_timeout: Duration::from_secs(60),
        inline_wait_cap: Duration::from_secs(1),
        idle_poll: Duration::from_millis(1),
    }
}

pub const OSTROVOK_URL: &str = "https://ostrovok.ru/hotel/russia/sochi/mid9999/grand_hotel/";

pub fn job_key(day: u32) -> JobKey {
    JobKey {
        target_id: TargetId::from_url(OSTROVOK_URL),
        check_in: NaiveDate::from_ymd_opt(2026, 5, day).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2026, 5, day + 2).unwrap(),
    }
}

pub fn ostrovok_job(day: u32) -> QueuedJob {
    QueuedJob {
        key: job_key(day),
        url: OSTROVOK_URL.to_string(),
        platform: Platform::Ostrovok,
        attempt: 0,
        last_error: None,
    }
}
