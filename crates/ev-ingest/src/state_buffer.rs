//! State buffer & change notifier.
//!
//! Latest-known-state cache per vehicle, explicitly constructed at startup
//! and shared between the ingestion task and external read paths. Readers
//! never block writers: the map holds `Arc` snapshots swapped atomically
//! under a short-lived lock, last-write-wins.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use ev_domain::TelemetrySnapshot;

/// One change notification; emitted only when an observable field differs
#[derive(Debug, Clone)]
pub struct StateChange {
    pub vehicle_id: Uuid,
    pub snapshot: Arc<TelemetrySnapshot>,
}

/// Process-wide latest-snapshot cache with change notifications.
pub struct StateBuffer {
    latest: RwLock<HashMap<Uuid, Arc<TelemetrySnapshot>>>,
    change_tx: broadcast::Sender<StateChange>,
}

impl StateBuffer {
    #[must_use]
    pub fn new(notify_capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(notify_capacity);
        Self {
            latest: RwLock::new(HashMap::new()),
            change_tx,
        }
    }

    /// Most recent snapshot for a vehicle
    #[must_use]
    pub fn latest(&self, vehicle_id: Uuid) -> Option<Arc<TelemetrySnapshot>> {
        self.latest.read().get(&vehicle_id).cloned()
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.change_tx.subscribe()
    }

    /// Replace the cached snapshot. Returns true and notifies subscribers
    /// only when at least one observable field changed.
    pub fn update(&self, snapshot: Arc<TelemetrySnapshot>) -> bool {
        let vehicle_id = snapshot.vehicle_id;
        let changed = {
            let mut guard = self.latest.write();
            let changed = guard
                .get(&vehicle_id)
                .is_none_or(|prev| prev.observably_differs(&snapshot));
            guard.insert(vehicle_id, Arc::clone(&snapshot));
            changed
        };

        if changed {
            // Send fails only when nobody is subscribed, which is fine
            let _ = self.change_tx.send(StateChange {
                vehicle_id,
                snapshot,
            });
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ev_domain::{
        BatteryState, CellChemistry, ChargerState, ClimateState, ClosureState, GearState,
        GeoPoint, OtaState, PowerState, TirePressures,
    };

    fn snapshot(vehicle_id: Uuid) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at: Utc::now(),
            location: GeoPoint::new(47.6, -122.3, 50.0),
            odometer_mi: 5000.0,
            battery: BatteryState {
                level_pct: 55.0,
                charge_limit_pct: 80.0,
                usable_capacity_kwh: None,
                chemistry: CellChemistry::Nmc,
            },
            range_estimate_mi: 160.0,
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

    #[tokio::test]
    async fn first_update_notifies_and_caches() {
        let buffer = StateBuffer::new(16);
        let mut rx = buffer.subscribe();
        let vehicle = Uuid::new_v4();

        assert!(buffer.update(Arc::new(snapshot(vehicle))));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.vehicle_id, vehicle);
        assert!(buffer.latest(vehicle).is_some());
    }

    #[tokio::test]
    async fn noop_update_does_not_notify() {
        let buffer = StateBuffer::new(16);
        let vehicle = Uuid::new_v4();
        let first = snapshot(vehicle);

        buffer.update(Arc::new(first.clone()));
        let mut rx = buffer.subscribe();

        // Fresher timestamp, identical observable state
        let mut same = first;
        same.recorded_at = same.recorded_at + Duration::seconds(30);
        assert!(!buffer.update(Arc::new(same)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let buffer = StateBuffer::new(16);
        let vehicle = Uuid::new_v4();

        let mut a = snapshot(vehicle);
        a.battery.level_pct = 55.0;
        let mut b = snapshot(vehicle);
        b.battery.level_pct = 54.0;

        buffer.update(Arc::new(a));
        buffer.update(Arc::new(b));
        let latest = buffer.latest(vehicle).unwrap();
        assert!((latest.battery.level_pct - 54.0).abs() < 1e-9);
    }
}
