mod metrics;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedline_core::config::LoggingConfig;
use seedline_core::{
    build_backends, build_directory, load_config, validate_config, AlwaysOnGate,
    ConnectivityGate, JobIntervals, JobScheduler, MagnetBuilder, MultiBackendResolver, ProbeGate,
    SearchOrchestrator, SourceService, SqliteRepository, StatsRefresher, StatsSchedule,
    UdpTrackerScraper,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the metrics text file is rewritten.
const METRICS_WRITE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("SEEDLINE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config.logging);
    info!(version = VERSION, config = ?config_path, "Starting seedline");

    validate_config(&config).context("Configuration validation failed")?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
    info!("Database path: {:?}", config.database.path);

    let repository = Arc::new(
        SqliteRepository::new(&config.database.path).context("Failed to open database")?,
    );

    let descriptors = build_backends(&config.resolver, &config.data_dir)
        .await
        .context("Failed to initialize metadata backends")?;
    let resolver = Arc::new(MultiBackendResolver::new(
        descriptors,
        Some(config.data_dir.clone()),
    ));

    let directory = Arc::new(
        build_directory(&config.search).context("Failed to create content directory clients")?,
    );

    let search = SearchOrchestrator::new(
        repository.clone(),
        directory.clone(),
        MagnetBuilder::new(config.trackers.best.clone()),
    );

    // Probe loop shuts down with everything else.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let gate: Arc<dyn ConnectivityGate> = if config.gate.require_active {
        let probe = Arc::new(ProbeGate::new(&config.gate).context("Failed to create probe gate")?);
        Arc::clone(&probe).spawn(
            Duration::from_secs(config.gate.probe_interval_secs),
            shutdown_tx.subscribe(),
        );
        info!(probe_url = %config.gate.probe_url, "Connectivity gate enabled");
        probe
    } else {
        Arc::new(AlwaysOnGate::new())
    };

    let sources = Arc::new(
        SourceService::new(
            repository.clone(),
            resolver.clone(),
            directory,
            search,
            gate.clone(),
            &config.backfill,
        )
        .context("Failed to create source service")?,
    );

    let scraper = UdpTrackerScraper::new(
        &config.trackers.best,
        Duration::from_millis(config.trackers.scrape_timeout_ms),
    );
    let stats = Arc::new(StatsRefresher::new(
        repository,
        Arc::new(scraper),
        StatsSchedule::new(config.stats.min_interval_hours, config.stats.max_interval_hours),
        config.stats.batch_size,
    ));

    let scheduler = Arc::new(JobScheduler::new(
        JobIntervals::from(&config.scheduler),
        sources,
        stats,
    ));
    if config.scheduler.enabled {
        scheduler.start().await;
    } else {
        info!("Scheduler disabled in config");
    }

    let metrics_path = config.data_dir.join("seedline.prom");
    let metrics_task = spawn_metrics_writer(
        metrics_path.clone(),
        Arc::clone(&scheduler),
        Arc::clone(&resolver),
        Arc::clone(&gate),
        shutdown_tx.subscribe(),
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    if scheduler.is_running() {
        scheduler.stop().await;
    }
    let _ = shutdown_tx.send(());
    let _ = metrics_task.await;

    metrics::collect_dynamic_metrics(&scheduler, &resolver, gate.as_ref());
    if let Err(e) = metrics::write_textfile(&metrics_path) {
        error!(error = %e, "Failed to write final metrics");
    }

    let status = scheduler.status().await;
    info!(
        status = %serde_json::to_string(&status).unwrap_or_default(),
        "Seedline stopped"
    );

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn spawn_metrics_writer(
    path: PathBuf,
    scheduler: Arc<JobScheduler>,
    resolver: Arc<MultiBackendResolver>,
    gate: Arc<dyn ConnectivityGate>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            metrics::collect_dynamic_metrics(&scheduler, &resolver, gate.as_ref());
            write_metrics(&path);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(METRICS_WRITE_INTERVAL) => {}
            }
        }
    })
}

fn write_metrics(path: &Path) {
    if let Err(e) = metrics::write_textfile(path) {
        error!(path = ?path, error = %e, "Failed to write metrics");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
