//! Ingestion pipeline.
//!
//! Single consumer of the coordinator's deduplicated snapshot stream.
//! Each snapshot is persisted (with bounded write retries), pushed into
//! the state buffer, and fed through the session engine; closed charge
//! sessions that met the calibration thresholds become capacity readings
//! for the battery-health analyzer. Storage escalation is logged as a
//! data gap, the stream itself keeps flowing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::state_buffer::StateBuffer;
use ev_analytics::{BatteryHealthAnalyzer, CapacityReading, ReadingSource};
use ev_domain::{ChargingSession, TelemetrySnapshot};
use ev_persistence::{SnapshotStore, WriteRetryPolicy};
use ev_sessions::SessionEngine;

/// How often open sessions are checked for idle timeouts
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot-stream consumer wiring storage, state and derivation together.
pub struct IngestPipeline {
    snapshots: Arc<dyn SnapshotStore>,
    retry: WriteRetryPolicy,
    state_buffer: Arc<StateBuffer>,
    engine: SessionEngine,
    analyzer: BatteryHealthAnalyzer,
    snapshot_rx: broadcast::Receiver<Arc<TelemetrySnapshot>>,
    shutdown: watch::Receiver<bool>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        retry: WriteRetryPolicy,
        state_buffer: Arc<StateBuffer>,
        engine: SessionEngine,
        analyzer: BatteryHealthAnalyzer,
        snapshot_rx: broadcast::Receiver<Arc<TelemetrySnapshot>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            snapshots,
            retry,
            state_buffer,
            engine,
            analyzer,
            snapshot_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("Pipeline shutting down");
                        return;
                    }
                }
                _ = sweep.tick() => self.sweep_timeouts().await,
                received = self.snapshot_rx.recv() => match received {
                    Ok(snapshot) => self.handle_snapshot(snapshot).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Pipeline lagged behind the snapshot stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Snapshot stream closed, pipeline exiting");
                        return;
                    }
                },
            }
        }
    }

    async fn handle_snapshot(&mut self, snapshot: Arc<TelemetrySnapshot>) {
        // Persistence first; an exhausted retry is a gap, not a stop
        let append = self
            .retry
            .run(|| self.snapshots.append(&snapshot))
            .await;
        if let Err(err) = append {
            tracing::error!(
                vehicle_id = %snapshot.vehicle_id,
                error = %err,
                "Snapshot write escalation, continuing with a data gap"
            );
        }

        self.state_buffer.update(Arc::clone(&snapshot));

        match self.engine.handle_snapshot(&snapshot).await {
            Ok(tick) => {
                if let Some(drive) = tick.closed_drive {
                    tracing::info!(
                        vehicle_id = %drive.vehicle_id,
                        drive_id = %drive.id,
                        distance_mi = format_args!("{:.1}", drive.distance_mi),
                        "Drive closed"
                    );
                }
                if let Some(charge) = tick.closed_charge {
                    self.offer_calibration(&charge, &snapshot).await;
                }
            }
            Err(err) => {
                tracing::error!(
                    vehicle_id = %snapshot.vehicle_id,
                    error = %err,
                    "Session derivation failed for snapshot"
                );
            }
        }

        // Directly reported capacity also feeds the health trend
        if let Some(capacity_kwh) = snapshot.battery.usable_capacity_kwh {
            self.offer_reading(&CapacityReading {
                vehicle_id: snapshot.vehicle_id,
                recorded_at: snapshot.recorded_at,
                odometer_mi: snapshot.odometer_mi,
                capacity_kwh,
                source: ReadingSource::Reported,
            })
            .await;
        }
    }

    /// A closed charge that met the calibration thresholds carries an
    /// implied pack capacity; hand it to the analyzer.
    async fn offer_calibration(&self, charge: &ChargingSession, snapshot: &TelemetrySnapshot) {
        tracing::info!(
            vehicle_id = %charge.vehicle_id,
            charge_id = %charge.id,
            energy_added_kwh = format_args!("{:.1}", charge.energy_added_kwh),
            "Charge closed"
        );
        let (Some(capacity_kwh), Some(confidence)) =
            (charge.calculated_capacity_kwh, charge.capacity_confidence)
        else {
            return;
        };
        self.offer_reading(&CapacityReading {
            vehicle_id: charge.vehicle_id,
            recorded_at: charge.ended_at.unwrap_or(snapshot.recorded_at),
            odometer_mi: snapshot.odometer_mi,
            capacity_kwh,
            source: ReadingSource::Calibrated { confidence },
        })
        .await;
    }

    async fn offer_reading(&self, reading: &CapacityReading) {
        if let Err(err) = self.analyzer.ingest_reading(reading).await {
            // Vehicles without registry entries simply have no health trend
            tracing::debug!(
                vehicle_id = %reading.vehicle_id,
                error = %err,
                "Capacity reading not ingested"
            );
        }
    }

    async fn sweep_timeouts(&mut self) {
        match self.engine.check_timeouts(Utc::now()).await {
            Ok(closed) => {
                for drive in closed {
                    tracing::info!(
                        vehicle_id = %drive.vehicle_id,
                        drive_id = %drive.id,
                        "Drive closed by idle timeout"
                    );
                }
            }
            Err(err) => tracing::error!(error = %err, "Timeout sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use ev_analytics::AnalyzerConfig;
    use ev_domain::{
        BatteryState, CellChemistry, ChargerState, ClimateState, ClosureState, GearState,
        GeoPoint, OtaState, PowerState, TimeRange, TirePressures,
    };
    use ev_persistence::{MemoryStore, Result as StoreResult, StorageError, StoreSet};
    use ev_sessions::SessionConfig;
    use uuid::Uuid;

    fn snapshot(vehicle_id: Uuid, recorded_at: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at,
            location: GeoPoint::new(47.6, -122.3, 50.0),
            odometer_mi: 12_000.0,
            battery: BatteryState {
                level_pct: 70.0,
                charge_limit_pct: 80.0,
                usable_capacity_kwh: None,
                chemistry: CellChemistry::Nmc,
            },
            range_estimate_mi: 200.0,
            power_state: PowerState::Standby,
            gear_state: GearState::Park,
            drive_mode: None,
            charger_state: ChargerState::Disconnected,
            charge_port_open: false,
            charge_power_kw: None,
            climate: ClimateState {
                inside_temp_c: None,
                outside_temp_c: None,
                hvac_on: false,
            },
            closures: ClosureState::default(),
            tires: TirePressures::default(),
            ota: OtaState::default(),
            raw: serde_json::Value::Null,
        }
    }

    fn pipeline_over(
        store: Arc<MemoryStore>,
        snapshots: Arc<dyn SnapshotStore>,
        rx: broadcast::Receiver<Arc<TelemetrySnapshot>>,
        shutdown: watch::Receiver<bool>,
        buffer: Arc<StateBuffer>,
    ) -> IngestPipeline {
        let engine = SessionEngine::new(store.clone(), store.clone(), SessionConfig::default());
        let analyzer =
            BatteryHealthAnalyzer::new(store.clone(), store, AnalyzerConfig::default());
        IngestPipeline::new(
            snapshots,
            WriteRetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            buffer,
            engine,
            analyzer,
            rx,
            shutdown,
        )
    }

    #[tokio::test]
    async fn snapshots_are_persisted_and_buffered() {
        let store = Arc::new(MemoryStore::new());
        let buffer = Arc::new(StateBuffer::new(16));
        let (tx, rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = pipeline_over(store.clone(), store.clone(), rx, shutdown_rx, buffer.clone());
        let handle = tokio::spawn(pipeline.run());

        let vehicle = Uuid::new_v4();
        let now = Utc::now();
        tx.send(Arc::new(snapshot(vehicle, now))).unwrap();
        tx.send(Arc::new(snapshot(vehicle, now + ChronoDuration::seconds(30))))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let stored = store
            .snapshots()
            .get_range(
                vehicle,
                TimeRange {
                    start: now - ChronoDuration::minutes(1),
                    end: now + ChronoDuration::minutes(1),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(buffer.latest(vehicle).is_some());
    }

    struct FailingSnapshotStore;

    #[async_trait]
    impl SnapshotStore for FailingSnapshotStore {
        async fn append(&self, _snapshot: &TelemetrySnapshot) -> StoreResult<()> {
            Err(StorageError::Unavailable("disk on fire".into()))
        }

        async fn get_range(
            &self,
            _vehicle_id: Uuid,
            _range: TimeRange,
            _limit: Option<usize>,
        ) -> StoreResult<Vec<TelemetrySnapshot>> {
            Ok(vec![])
        }

        async fn get_latest(&self, _vehicle_id: Uuid) -> StoreResult<Option<TelemetrySnapshot>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn storage_escalation_does_not_stop_the_stream() {
        let store = Arc::new(MemoryStore::new());
        let buffer = Arc::new(StateBuffer::new(16));
        let (tx, rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = pipeline_over(
            store,
            Arc::new(FailingSnapshotStore),
            rx,
            shutdown_rx,
            buffer.clone(),
        );
        let handle = tokio::spawn(pipeline.run());

        let vehicle = Uuid::new_v4();
        tx.send(Arc::new(snapshot(vehicle, Utc::now()))).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Write escalated, but the snapshot still reached the state buffer
        assert!(buffer.latest(vehicle).is_some());
    }
}
