use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roomwatch::config::RunConfig;
use roomwatch::dates::{self, parse::parse_range_any, windows, DateRangeSpec};
use roomwatch::models::job::{JobKey, QueuedJob};
use roomwatch::models::target::Target;
use roomwatch::services::aggregate::RunLedger;
use roomwatch::services::limiter::{DispatchGate, Reservation};
use roomwatch::services::queue::{Broker, MemoryBroker, RedisBroker};
use roomwatch::services::session::{ChromeFactory, HttpFactory, SessionFactory, SessionManager};
use roomwatch::worker::Worker;

/// Collect nightly room prices for hotel listings across date ranges.
#[derive(Debug, Parser)]
#[command(name = "roomwatch", version)]
struct Args {
    /// File with listing URLs, one per line.
    #[arg(long)]
    targets: PathBuf,

    /// File with free-text date ranges, one per line. When omitted, ranges
    /// are taken from the date parameters embedded in each listing URL.
    #[arg(long)]
    dates: Option<PathBuf>,

    /// Length of stay in nights.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    stay: u32,

    /// Output CSV path.
    #[arg(long, default_value = "hotel_prices.csv")]
    output: PathBuf,

    /// Concurrent workers in this process.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(usize))]
    workers: usize,

    /// Page fetching engine.
    #[arg(long, value_enum, default_value_t = Engine::Chrome)]
    engine: Engine,

    /// Label stamped on every output row, for keeping series apart.
    #[arg(long)]
    group: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
    Chrome,
    Http,
}

/// Exit code for unusable input artifacts (zero valid targets or ranges),
/// distinct from run-level failures.
const EXIT_BAD_INPUT: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RunConfig::from_env().expect("Failed to load configuration from environment");

    describe_metrics();

    let targets = load_targets(&args.targets);
    if targets.is_empty() {
        error!("no valid targets in {}", args.targets.display());
        std::process::exit(EXIT_BAD_INPUT);
    }

    let today = chrono::Utc::now().date_naive();
    let ranges = match &args.dates {
        Some(path) => load_ranges(path, today),
        None => Vec::new(),
    };
    if args.dates.is_some() && ranges.is_empty() {
        error!(
            "no valid date ranges in {}",
            args.dates.as_ref().expect("checked above").display()
        );
        std::process::exit(EXIT_BAD_INPUT);
    }

    let broker: Arc<dyn Broker> = match &config.redis_url {
        Some(url) => {
            let broker = RedisBroker::new(url).expect("Failed to open Redis broker");
            if let Err(e) = broker.health_check().await {
                error!(error = %e, "job queue broker unreachable");
                std::process::exit(1);
            }
            info!("using Redis job queue");
            Arc::new(broker)
        }
        None => {
            info!("no REDIS_URL configured, using in-process job queue");
            Arc::new(MemoryBroker::new())
        }
    };
    let gate = Arc::new(DispatchGate::new(config.gate_config()));
    let mut ledger = RunLedger::new(args.group.clone());

    let planned = plan_jobs(&targets, &ranges, args.stay);
    if planned.is_empty() {
        if args.dates.is_none() {
            error!("no target URL carries an embedded date range and no --dates file was given");
            std::process::exit(EXIT_BAD_INPUT);
        }
        warn!("every range is shorter than the requested stay; nothing to do");
    }

    let mut admitted = 0usize;
    for (job, target) in &planned {
        if !gate.try_claim(&job.key) {
            // Same (target, window) listed more than once: collapse.
            continue;
        }
        ledger.expect(job.key.clone(), target.url.as_str());
        let enqueued = match gate.reserve(&job.key.target_id) {
            Reservation::Ready => broker.enqueue(job).await,
            Reservation::Wait(delay) => broker.enqueue_delayed(job, delay).await,
        };
        if let Err(e) = enqueued {
            error!(error = %e, "job queue broker failed during submission");
            std::process::exit(1);
        }
        metrics::counter!("roomwatch_jobs_enqueued").increment(1);
        admitted += 1;
    }
    info!(
        targets = targets.len(),
        ranges = ranges.len(),
        jobs = admitted,
        stay = args.stay,
        "run submitted"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();
    for id in 0..args.workers.max(1) {
        let factory = session_factory(args.engine, &config);
        let sessions = SessionManager::new(factory, config.rotate_after_antibot);
        let worker = Worker::new(
            id,
            Arc::clone(&broker),
            Arc::clone(&gate),
            sessions,
            config.worker_config(),
        );
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    // Drain terminal outcomes until every expected job has one.
    while !ledger.is_complete() {
        match broker.next_result().await {
            Ok(Some(outcome)) => ledger.record(outcome),
            Ok(None) => tokio::time::sleep(Duration::from_millis(200)).await,
            Err(e) => {
                error!(error = %e, "job queue broker failed while collecting results");
                std::process::exit(1);
            }
        }
    }

    shutdown_tx.send(true).ok();
    for handle in handles {
        handle.await.ok();
    }

    if let Err(e) = ledger.write_csv(&args.output) {
        error!(error = %e, path = %args.output.display(), "failed to write output artifact");
        std::process::exit(1);
    }
    info!(path = %args.output.display(), rows = ledger.expected(), "output written");

    for summary in ledger.summaries() {
        info!(
            target = %summary.target_url,
            priced = summary.priced,
            sold_out = summary.sold_out,
            errors = summary.errors,
            min = summary.min_price,
            max = summary.max_price,
            mean = summary.mean_price,
            "target summary"
        );
    }
}

fn session_factory(engine: Engine, config: &RunConfig) -> Box<dyn SessionFactory> {
    match engine {
        Engine::Chrome => Box::new(ChromeFactory {
            headless: config.headless,
            nav_timeout: Duration::from_secs(config.nav_timeout_secs),
            stabilize: Duration::from_secs(config.stabilize_secs),
        }),
        Engine::Http => Box::new(HttpFactory {
            timeout: Duration::from_secs(config.nav_timeout_secs),
        }),
    }
}

/// Read the target list, skipping malformed lines with a warning. A bad line
/// is fatal to that line only, never to the run.
fn load_targets(path: &PathBuf) -> Vec<Target> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = %e, path = %path.display(), "cannot read target list");
            std::process::exit(EXIT_BAD_INPUT);
        }
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match Target::from_line(line) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(error = %e, "skipping target line");
                None
            }
        })
        .collect()
}

fn load_ranges(path: &PathBuf, today: chrono::NaiveDate) -> Vec<DateRangeSpec> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = %e, path = %path.display(), "cannot read date range list");
            std::process::exit(EXIT_BAD_INPUT);
        }
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match parse_range_any(line, today) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!(error = %e, "skipping date range line");
                None
            }
        })
        .collect()
}

/// Cross every target with every window of every range. Without a date file
/// each target falls back to the range embedded in its own URL.
fn plan_jobs<'t>(
    targets: &'t [Target],
    ranges: &[DateRangeSpec],
    stay: u32,
) -> Vec<(QueuedJob, &'t Target)> {
    let mut jobs = Vec::new();
    for target in targets {
        let target_ranges: Vec<DateRangeSpec> = if ranges.is_empty() {
            match dates::range_from_url(&target.url) {
                Some((start, end)) => vec![DateRangeSpec {
                    raw: target.url.to_string(),
                    locale: "url",
                    start,
                    end,
                }],
                None => {
                    warn!(target = %target.url, "no date range in URL, skipping target");
                    continue;
                }
            }
        } else {
            ranges.to_vec()
        };

        for range in &target_ranges {
            for window in windows(range, stay) {
                let key = JobKey {
                    target_id: target.id.clone(),
                    check_in: window.check_in,
                    check_out: window.check_out,
                };
                jobs.push((
                    QueuedJob {
                        key,
                        url: target.window_url(&window).to_string(),
                        platform: target.platform,
                        attempt: 0,
                        last_error: None,
                    },
                    target,
                ));
            }
        }
    }
    jobs
}

fn describe_metrics() {
    metrics::describe_counter!("roomwatch_jobs_enqueued", "Jobs admitted to the queue");
    metrics::describe_counter!("roomwatch_jobs_completed", "Jobs finished with a terminal result");
    metrics::describe_counter!(
        "roomwatch_jobs_dead_lettered",
        "Jobs that exhausted their retry budget"
    );
    metrics::describe_counter!(
        "roomwatch_antibot_detections",
        "Fetches that hit a block page or challenge"
    );
    metrics::describe_counter!(
        "roomwatch_session_rotations",
        "Browser sessions discarded after repeated anti-bot outcomes"
    );
}
