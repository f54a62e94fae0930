//! FabSentry gateway binary.
//!
//! # Usage
//!
//! ```bash
//! # Subscribe to the broker/simulator over TCP (default)
//! fabsentry --intake 127.0.0.1:1883
//!
//! # Pipe frames from the simulator
//! fabsentry-simulate --count 100 | fabsentry --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `FABSENTRY_CONFIG`: path to the TOML config file
//! - `FABSENTRY_CORS_ORIGINS`: allowed dashboard dev origins
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fabsentry::acquisition::source::{StdinSource, TcpSource};
use fabsentry::acquisition::TelemetryDecoder;
use fabsentry::api::{create_app, DashboardState};
use fabsentry::model::{FeatureTransform, InferenceArtifact, InferenceEngine};
use fabsentry::pipeline::{run_intake, spawn_workers, EdgePipeline, StatsAggregator, StatsSnapshot};
use fabsentry::storage::FabStore;
use fabsentry::types::ProductionLine;
use fabsentry::FabConfig;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fabsentry")]
#[command(about = "FabSentry edge quality-inspection gateway")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides FABSENTRY_CONFIG lookup)
    #[arg(long)]
    config: Option<String>,

    /// Read intake frames from stdin instead of TCP
    /// Use with the simulator: fabsentry-simulate | fabsentry --stdin
    #[arg(long)]
    stdin: bool,

    /// Override the intake broker address
    #[arg(long, value_name = "HOST:PORT")]
    intake: Option<String>,

    /// Override the API server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the inference artifact path
    #[arg(long)]
    artifact: Option<String>,

    /// Override the durable store path
    #[arg(long)]
    db: Option<String>,

    /// Override the worker pool size
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🏭 FABSENTRY — EDGE QUALITY-INSPECTION GATEWAY");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    let mut config = match &args.config {
        Some(path) => FabConfig::from_file(path)?,
        None => FabConfig::load()?,
    };
    if let Some(intake) = &args.intake {
        let (host, port) = parse_host_port(intake)?;
        config.intake.host = host;
        config.intake.port = port;
    }
    if let Some(addr) = &args.addr {
        config.api.addr = addr.clone();
    }
    if let Some(path) = &args.artifact {
        config.artifact.path = path.clone();
    }
    if let Some(path) = &args.db {
        config.storage.path = path.clone();
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    config.validate()?;

    // ------------------------------------------------------------------
    // Inference artifact — a load or contract failure is fatal.
    // ------------------------------------------------------------------
    let artifact = InferenceArtifact::load(&config.artifact.path)
        .with_context(|| format!("cannot serve without artifact {}", config.artifact.path))?;
    let transform = FeatureTransform::from_artifact(&artifact)
        .context("artifact/pipeline feature contract mismatch — version skew?")?;
    let engine =
        InferenceEngine::from_artifact(&artifact).context("unsupported artifact model")?;
    info!(
        "🔧 Model ready: {} ({}, threshold {})",
        engine.model_version(),
        engine.model_kind(),
        engine.threshold()
    );

    // ------------------------------------------------------------------
    // Storage, statistics, pipeline
    // ------------------------------------------------------------------
    let store = FabStore::open(&config.storage.path)
        .with_context(|| format!("cannot open store at {}", config.storage.path))?;
    let stats = Arc::new(StatsAggregator::new());
    let decoder = TelemetryDecoder::new(config.intake.topics.clone());
    let pipeline = Arc::new(EdgePipeline::new(
        decoder,
        transform,
        engine,
        store.clone(),
        stats.clone(),
    ));

    let (queue_tx, queue_rx) = mpsc::channel(config.pipeline.queue_capacity);
    let mut workers = JoinSet::new();
    spawn_workers(config.pipeline.workers, pipeline, queue_rx, &mut workers);
    info!(
        "👷 {} workers draining a queue of {}",
        config.pipeline.workers, config.pipeline.queue_capacity
    );

    // ------------------------------------------------------------------
    // Shutdown plumbing: Ctrl+C stops intake; in-flight events drain.
    // ------------------------------------------------------------------
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("⏹️  Ctrl+C — stopping intake");
                cancel.cancel();
            }
        });
    }

    // ------------------------------------------------------------------
    // Dashboard API
    // ------------------------------------------------------------------
    let model_version = artifact.model_version.clone();
    let app = create_app(DashboardState::new(store, stats.clone(), &model_version));
    let listener = tokio::net::TcpListener::bind(&config.api.addr)
        .await
        .with_context(|| format!("cannot bind API server to {}", config.api.addr))?;
    info!("🌐 Dashboard API listening on {}", config.api.addr);
    let server = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
            {
                error!("API server error: {e}");
            }
        })
    };

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------
    let intake = if args.stdin {
        tokio::spawn(run_intake(
            StdinSource::new(),
            queue_tx,
            stats.clone(),
            cancel.clone(),
        ))
    } else {
        let source = TcpSource::new(
            &config.intake.host,
            config.intake.port,
            config.intake.topic_names(),
        );
        tokio::spawn(run_intake(source, queue_tx, stats.clone(), cancel.clone()))
    };

    // Intake finishing (EOF, transport exhaustion, or Ctrl+C) closes the
    // queue; workers drain the backlog and exit.
    intake.await.context("intake task panicked")?;
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!("Worker task failed: {e}");
        }
    }

    cancel.cancel();
    let _ = server.await;

    log_final_statistics(&stats.snapshot());
    info!("✅ Gateway stopped");
    Ok(())
}

/// Parse `HOST:PORT` (IPv6 hosts use the last colon as separator).
fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("expected HOST:PORT, got {addr:?}"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in {addr:?}"))?;
    Ok((host.to_string(), port))
}

/// Final shutdown summary, matching the operator log format.
fn log_final_statistics(snapshot: &StatsSnapshot) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 PROCESSING STATISTICS");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Total processed:  {}", snapshot.total_processed);
    info!("   Defects detected: {}", snapshot.defects_detected);
    info!("   Events dropped:   {}", snapshot.dropped.total());
    if snapshot.dropped.total() > 0 {
        info!(
            "     decode: {} | unknown category: {} | inference: {} | persistence: {} | queue full: {}",
            snapshot.dropped.decode,
            snapshot.dropped.unknown_category,
            snapshot.dropped.inference,
            snapshot.dropped.persistence,
            snapshot.dropped.queue_full
        );
    }
    info!("   By production line:");
    for line in ProductionLine::ALL {
        if let Some(counters) = snapshot.by_line.get(&line) {
            if counters.total_processed > 0 {
                let rate = counters.total_defects as f64 / counters.total_processed as f64 * 100.0;
                info!(
                    "     {:<12}: {:>4} wafers, {:>3} defects ({:.1}%)",
                    line, counters.total_processed, counters.total_defects, rate
                );
            }
        }
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
