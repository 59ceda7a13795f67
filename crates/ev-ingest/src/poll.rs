//! Polling acquirer.
//!
//! Pull-based fallback/alternate acquisition: one request-response fetch
//! per tick per vehicle, exactly one snapshot appended per successful poll.
//! The interval adapts to the vehicle's last known power state so sleeping
//! vehicles are not woken unnecessarily. Poll failures wait for the next
//! scheduled tick, never busy-loop.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::coordinator::Acquirer;
use crate::error::{IngestError, Result};
use crate::protocol::wire::VehicleStateWire;
use ev_domain::TelemetrySnapshot;

/// Polling tunables
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub rest_url: String,
    pub access_token: String,
    pub awake_interval: Duration,
    pub asleep_interval: Duration,
    pub http_timeout: Duration,
}

/// Timer-driven request-response acquirer, one logical timer per vehicle.
pub struct PollAcquirer {
    client: reqwest::Client,
    config: PollConfig,
    snapshot_tx: mpsc::Sender<TelemetrySnapshot>,
    shutdown: watch::Receiver<bool>,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl PollAcquirer {
    /// Build with a dedicated HTTP client honoring the per-poll timeout.
    pub fn new(
        config: PollConfig,
        snapshot_tx: mpsc::Sender<TelemetrySnapshot>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            snapshot_tx,
            shutdown,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// One request-response fetch of a vehicle's current state.
    pub async fn fetch_state(
        client: &reqwest::Client,
        rest_url: &str,
        access_token: &str,
        vehicle_id: Uuid,
    ) -> Result<TelemetrySnapshot> {
        let url = format!("{rest_url}/api/1/vehicles/{vehicle_id}/state");
        let response = client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;

        let raw: serde_json::Value = response.json().await?;
        let wire: VehicleStateWire = serde_json::from_value(raw.clone())
            .map_err(|e| IngestError::MalformedFrame(e.to_string()))?;
        Ok(wire.into_snapshot(vehicle_id, raw))
    }

    async fn poll_loop(
        client: reqwest::Client,
        config: PollConfig,
        vehicle_id: Uuid,
        snapshot_tx: mpsc::Sender<TelemetrySnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Start on the short interval until the first fetch says otherwise
        let mut interval = config.awake_interval;
        loop {
            match Self::fetch_state(&client, &config.rest_url, &config.access_token, vehicle_id)
                .await
            {
                Ok(snapshot) => {
                    interval = if snapshot.is_awake() {
                        config.awake_interval
                    } else {
                        config.asleep_interval
                    };
                    if snapshot_tx.send(snapshot).await.is_err() {
                        return; // pipeline gone, nothing left to do
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        %vehicle_id,
                        error = %err,
                        next_poll_secs = interval.as_secs(),
                        "Poll failed, retrying on next tick"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Acquirer for PollAcquirer {
    async fn start(&self, vehicle_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&vehicle_id) {
            return Ok(());
        }
        tracing::info!(
            %vehicle_id,
            awake_secs = self.config.awake_interval.as_secs(),
            asleep_secs = self.config.asleep_interval.as_secs(),
            "Starting polling acquisition"
        );
        let handle = tokio::spawn(Self::poll_loop(
            self.client.clone(),
            self.config.clone(),
            vehicle_id,
            self.snapshot_tx.clone(),
            self.shutdown.clone(),
        ));
        tasks.insert(vehicle_id, handle);
        Ok(())
    }

    async fn stop(&self, vehicle_id: Uuid) -> Result<()> {
        if let Some(handle) = self.tasks.lock().remove(&vehicle_id) {
            handle.abort();
            tracing::info!(%vehicle_id, "Stopped polling acquisition");
        }
        Ok(())
    }
}
