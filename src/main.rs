use alarm_correlator::{
    config::{Config, ObservabilityConfig},
    models::{Event, EventRecord},
    notifications::LoggingNotifier,
    processing::AlarmPersister,
    state::{AlarmFilter, AlarmStore, EventStore, InMemoryStore},
};
use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use validator::Validate;

#[derive(Parser)]
#[command(name = "alarmd", version)]
#[command(about = "Replay events through the alarm correlation engine", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ALARMD_CONFIG_PATH", default_value = "config/alarmd.toml")]
    config: String,

    /// JSON-lines file of `{ "event": ..., "record": ... }` entries; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Archive cleared alarms when their problem comes back
    #[arg(long)]
    create_new_if_cleared: bool,

    /// Print Prometheus metrics at exit
    #[arg(long)]
    metrics: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Deserialize)]
struct ReplayEntry {
    event: Event,
    #[serde(default)]
    record: Option<EventRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(workers) = cli.workers {
        config.persister.worker_threads = workers;
    }
    if cli.create_new_if_cleared {
        config.persister.create_new_if_cleared = true;
    }
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_tracing(&config.observability);
    tracing::info!("Starting alarmd v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.prometheus_enabled {
        if let Err(e) = alarm_correlator::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let store = Arc::new(InMemoryStore::new());
    let persister = Arc::new(
        AlarmPersister::new(&config.persister, store.clone(), store.clone(), store.clone())
            .with_notifier(Arc::new(LoggingNotifier)),
    );
    tracing::info!(
        workers = config.persister.worker_threads,
        stripes = persister.stripe_count(),
        create_new_if_cleared = config.persister.effective_create_new_if_cleared(),
        "Alarm persister initialized"
    );

    let entries = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            read_entries(file).await?
        }
        None => read_entries(tokio::io::stdin()).await?,
    };

    // Stand in for the upstream event writer
    for record in entries.iter().filter_map(|entry| entry.record.as_ref()) {
        store.save_or_update_event(record).await?;
    }

    let failed = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel::<Event>(1024);
    let rx = Arc::new(Mutex::new(rx));

    let workers: Vec<_> = (0..config.persister.worker_threads)
        .map(|worker| {
            let rx = rx.clone();
            let persister = persister.clone();
            let failed = failed.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(event) = next else { break };

                    if let Err(e) = persister.persist(&event).await {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(worker, event_id = event.id, error_code = e.error_code(), "{}", e);
                    }
                }
            })
        })
        .collect();

    let total = entries.len();
    for entry in entries {
        tx.send(entry.event).await.context("All workers exited early")?;
    }
    drop(tx);

    for result in futures::future::join_all(workers).await {
        result.context("Worker task panicked")?;
    }

    tracing::info!(
        events = total,
        failed = failed.load(Ordering::Relaxed),
        "Replay finished"
    );

    for alarm in store.list_alarms(&AlarmFilter::default()).await? {
        println!("{}", serde_json::to_string(&alarm)?);
    }

    if cli.metrics {
        print!("{}", alarm_correlator::metrics::gather_metrics());
    }

    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("alarm_correlator={0},alarmd={0}", observability.log_level)));

    // Logs go to stderr; stdout carries the alarms
    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn read_entries<R: AsyncRead + Unpin>(input: R) -> anyhow::Result<Vec<ReplayEntry>> {
    let mut lines = BufReader::new(input).lines();
    let mut entries = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ReplayEntry = serde_json::from_str(&line)
            .with_context(|| format!("Invalid replay entry on line {}", line_no))?;
        entries.push(entry);
    }

    Ok(entries)
}
