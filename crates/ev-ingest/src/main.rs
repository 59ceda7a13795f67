//! # EV Fleet Telemetry Ingestion Daemon
//!
//! Binary entry point wiring the acquisition coordinator, session engine
//! and battery-health analyzer over the in-memory store set.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ev_analytics::{AnalyzerConfig, BatteryHealthAnalyzer};
use ev_ingest::{
    Config, Coordinator, CoordinatorTask, IngestPipeline, PollAcquirer, PollConfig,
    ProtocolClient, PushAcquirer, PushWorker, ReconnectPolicy, StateBuffer,
};
use ev_persistence::{MemoryStore, WriteRetryPolicy};
use ev_sessions::{SessionConfig, SessionEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(
        version = ev_ingest::VERSION,
        mode = %config.mode,
        vehicles = config.vehicle_ids.len(),
        "Starting EV fleet telemetry ingestion"
    );

    let store = Arc::new(MemoryStore::new());
    let state_buffer = Arc::new(StateBuffer::new(256));

    let session_config = SessionConfig {
        idle_drive_timeout: chrono::Duration::from_std(config.idle_drive_timeout)?,
        reconcile_grace: chrono::Duration::from_std(config.reconcile_grace)?,
        min_calibration_soc_delta_pct: config.min_calibration_soc_delta_pct,
        min_calibration_duration: chrono::Duration::from_std(config.min_calibration_duration)?,
        ..SessionConfig::default()
    };
    let mut engine = SessionEngine::new(store.clone(), store.clone(), session_config);

    // Sessions left active by a previous run are resumed or force-closed
    engine.reconcile(&config.vehicle_ids, Utc::now()).await?;

    let analyzer = BatteryHealthAnalyzer::new(
        store.clone(),
        store.clone(),
        AnalyzerConfig {
            cadence: chrono::Duration::from_std(config.health_cadence)?,
            ..AnalyzerConfig::default()
        },
    );

    // Channel plumbing between acquirers, coordinator and pipeline
    let (snapshot_tx, snapshot_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(32);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = ProtocolClient::new(
        &config.ws_url,
        &config.access_token,
        config.handshake_timeout,
        config.keepalive_idle,
    );
    let worker = PushWorker::new(
        client,
        ReconnectPolicy::new(
            config.reconnect_base,
            config.reconnect_max,
            config.max_consecutive_errors,
        ),
        Vec::new(),
        command_rx,
        snapshot_tx.clone(),
        event_tx,
        shutdown_rx.clone(),
    );

    let push = Arc::new(PushAcquirer::new(command_tx));
    let poll = Arc::new(PollAcquirer::new(
        PollConfig {
            rest_url: config.rest_url.clone(),
            access_token: config.access_token.clone(),
            awake_interval: config.poll_awake_interval,
            asleep_interval: config.poll_asleep_interval,
            http_timeout: config.http_timeout,
        },
        snapshot_tx,
        shutdown_rx.clone(),
    )?);

    let coordinator = Coordinator::new(push, poll, 256);
    let pipeline = IngestPipeline::new(
        store,
        WriteRetryPolicy::default(),
        state_buffer,
        engine,
        analyzer,
        coordinator.subscribe(),
        shutdown_rx.clone(),
    );

    tokio::spawn(worker.run());
    tokio::spawn(
        CoordinatorTask::new(coordinator.clone(), snapshot_rx, event_rx, shutdown_rx).run(),
    );
    let pipeline_handle = tokio::spawn(pipeline.run());

    for vehicle_id in &config.vehicle_ids {
        coordinator.track(*vehicle_id, config.mode).await?;
    }
    tracing::info!("Acquisition started");

    shutdown_signal().await;
    shutdown_tx.send(true)?;
    pipeline_handle.await?;

    tracing::info!("Ingestion shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
