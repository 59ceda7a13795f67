//! EV Cloud Simulator CLI
//!
//! Runs the simulated vehicle-cloud API for development and testing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ev_cloud_sim::{router, SimState};

#[derive(Parser, Debug)]
#[command(name = "ev-cloud-sim")]
#[command(about = "Simulate the vehicle-cloud telemetry API")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8090")]
    listen: String,

    /// Number of simulated vehicles (ignored when --vehicle-id is given)
    #[arg(short, long, default_value = "3")]
    vehicles: usize,

    /// Explicit vehicle ids to simulate (repeatable)
    #[arg(long)]
    vehicle_id: Vec<Uuid>,

    /// Interval between data frames in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Require this access token on both endpoints
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ev_cloud_sim=info".parse()?))
        .init();

    let args = Args::parse();

    let vehicle_ids = if args.vehicle_id.is_empty() {
        (0..args.vehicles).map(|_| Uuid::new_v4()).collect()
    } else {
        args.vehicle_id.clone()
    };

    for id in &vehicle_ids {
        info!("Simulating vehicle {id}");
    }

    let state = Arc::new(SimState::new(
        &vehicle_ids,
        args.token.clone(),
        Duration::from_millis(args.tick_ms),
    ));

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("Vehicle state at http://{}/api/1/vehicles/<id>/state", args.listen);
    info!("Subscription channel at ws://{}/stream", args.listen);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
