//! Per-target dispatch cadence and duplicate-job admission.
//!
//! One `DispatchGate` is shared by the producer and every worker. It holds
//! the last dispatch instant per target and the set of job keys currently
//! pending or in progress. Both checks are atomic under one lock, so two
//! workers can never both win admission for the same key or the same
//! dispatch slot.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::job::JobKey;
use crate::models::target::TargetId;

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Hard floor between consecutive dispatches to one target.
    pub min_interval: Duration,
    /// Ceiling of the jitter band. The interval for each dispatch is drawn
    /// uniformly from [floor, ceiling] so the cadence never settles into a
    /// fingerprintable fixed rhythm.
    pub max_interval: Duration,
}

/// Outcome of a dispatch reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Caller owns the slot and must dispatch now.
    Ready,
    /// Too soon; come back after the given delay (defer, never drop).
    Wait(Duration),
}

#[derive(Default)]
struct GateState {
    last_dispatch: HashMap<TargetId, Instant>,
    in_flight: HashSet<JobKey>,
}

pub struct DispatchGate {
    cfg: GateConfig,
    state: Mutex<GateState>,
}

impl DispatchGate {
    pub fn new(cfg: GateConfig) -> DispatchGate {
        DispatchGate {
            cfg,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Claim a job key for execution. Returns false when the key is already
    /// pending or in progress: the duplicate must collapse into the existing
    /// job, not become a second one.
    pub fn try_claim(&self, key: &JobKey) -> bool {
        let mut state = self.state.lock().expect("gate lock poisoned");
        state.in_flight.insert(key.clone())
    }

    /// Release a key once its job reached a terminal state.
    pub fn release(&self, key: &JobKey) {
        let mut state = self.state.lock().expect("gate lock poisoned");
        state.in_flight.remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("gate lock poisoned").in_flight.len()
    }

    /// Reserve a dispatch slot for a target. On `Ready` the last-dispatch
    /// timestamp is advanced atomically; on `Wait` nothing is recorded.
    pub fn reserve(&self, target: &TargetId) -> Reservation {
        let interval = self.jittered_interval();
        let mut state = self.state.lock().expect("gate lock poisoned");
        let now = Instant::now();
        if let Some(last) = state.last_dispatch.get(target) {
            let elapsed = now.duration_since(*last);
            if elapsed < interval {
                return Reservation::Wait(interval - elapsed);
            }
        }
        state.last_dispatch.insert(target.clone(), now);
        Reservation::Ready
    }

    fn jittered_interval(&self) -> Duration {
        let floor = self.cfg.min_interval.as_millis() as u64;
        let ceiling = self.cfg.max_interval.as_millis() as u64;
        if ceiling <= floor {
            return self.cfg.min_interval;
        }
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }
}
