use serde::Deserialize;
use std::time::Duration;

use crate::services::limiter::GateConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Redis connection string. When unset, the in-process queue is used and
    /// the standalone worker binary cannot attach.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Floor of the per-target dispatch interval in milliseconds.
    #[serde(default = "default_min_dispatch_ms")]
    pub min_dispatch_interval_ms: u64,

    /// Ceiling of the per-target dispatch interval; the actual spacing is
    /// drawn uniformly from [floor, ceiling] per dispatch.
    #[serde(default = "default_max_dispatch_ms")]
    pub max_dispatch_interval_ms: u64,

    /// Total attempts allowed per job before dead-lettering.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts allowed for jobs failing with unparseable content.
    #[serde(default = "default_extraction_attempts")]
    pub extraction_attempts: u32,

    /// Base retry backoff for transient network failures in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Base retry backoff after an anti-bot detection in milliseconds.
    #[serde(default = "default_antibot_backoff_base_ms")]
    pub antibot_backoff_base_ms: u64,

    /// Upper bound on any single backoff delay in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Hard navigation timeout in seconds.
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    /// Wait after navigation for client-side rendering to settle, in seconds.
    #[serde(default = "default_stabilize_secs")]
    pub stabilize_secs: u64,

    /// How long a claimed job stays invisible before it is redelivered.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Consecutive anti-bot outcomes before the worker rotates its session.
    #[serde(default = "default_rotate_after_antibot")]
    pub rotate_after_antibot: u32,

    /// Run Chrome headless. Disable locally to watch the scrape.
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_min_dispatch_ms() -> u64 {
    1_000
}

fn default_max_dispatch_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_extraction_attempts() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_antibot_backoff_base_ms() -> u64 {
    30_000
}

fn default_backoff_cap_ms() -> u64 {
    300_000
}

fn default_nav_timeout_secs() -> u64 {
    30
}

fn default_stabilize_secs() -> u64 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

fn default_rotate_after_antibot() -> u32 {
    3
}

fn default_headless() -> bool {
    true
}

impl RunConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            min_interval: Duration::from_millis(self.min_dispatch_interval_ms),
            max_interval: Duration::from_millis(
                self.max_dispatch_interval_ms.max(self.min_dispatch_interval_ms),
            ),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.max_attempts,
            extraction_attempts: self.extraction_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            antibot_backoff_base: Duration::from_millis(self.antibot_backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            inline_wait_cap: Duration::from_millis(self.max_dispatch_interval_ms * 2),
            idle_poll: Duration::from_millis(250),
        }
    }
}
