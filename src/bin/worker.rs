use roomwatch::{
    config::RunConfig,
    services::{
        limiter::DispatchGate,
        queue::{Broker, RedisBroker},
        session::{ChromeFactory, SessionManager},
    },
    worker::Worker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting price scrape worker");

    // Load configuration
    let config = RunConfig::from_env().expect("Failed to load configuration");
    let redis_url = config
        .redis_url
        .clone()
        .expect("REDIS_URL must be set for the standalone worker");

    tracing::info!("Connecting to Redis");
    let broker = RedisBroker::new(&redis_url).expect("Failed to initialize job queue");
    broker
        .health_check()
        .await
        .expect("Failed to reach Redis");
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let gate = Arc::new(DispatchGate::new(config.gate_config()));
    let sessions = SessionManager::new(
        Box::new(ChromeFactory {
            headless: config.headless,
            nav_timeout: Duration::from_secs(config.nav_timeout_secs),
            stabilize: Duration::from_secs(config.stabilize_secs),
        }),
        config.rotate_after_antibot,
    );

    tracing::info!("Worker ready, starting job processing loop");

    // The shutdown sender is held for the life of the process; the worker
    // runs until killed or the broker becomes unreachable.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(0, broker, gate, sessions, config.worker_config());
    worker.run(shutdown_rx).await;
}
