//! # In-Memory Reference Backend
//!
//! Implements every store trait on top of `parking_lot` maps. Used by the
//! test suite and as the reference semantics a durable backend must match:
//! idempotent snapshot append, upsert-by-id sessions, per-vehicle cascade
//! delete.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::store::traits::{
    ChargeStore, DriveStore, HealthStore, SnapshotStore, StoreSet, VehicleStore,
};
use ev_domain::{
    BatteryHealthSnapshot, ChargingSession, Drive, TelemetrySnapshot, TimeRange, Vehicle,
};

/// All stores backed by process memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    // (vehicle, timestamp) -> snapshot; BTreeMap gives ordered range scans
    snapshots: RwLock<HashMap<Uuid, BTreeMap<DateTime<Utc>, TelemetrySnapshot>>>,
    drives: RwLock<HashMap<Uuid, Drive>>,
    charges: RwLock<HashMap<Uuid, ChargingSession>>,
    health: RwLock<HashMap<Uuid, Vec<BatteryHealthSnapshot>>>,
    vehicles: RwLock<HashMap<Uuid, Vehicle>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cascade delete: the vehicle and everything it owns
    pub async fn purge_vehicle(&self, vehicle_id: Uuid) -> Result<()> {
        self.inner.snapshots.write().remove(&vehicle_id);
        self.inner
            .drives
            .write()
            .retain(|_, d| d.vehicle_id != vehicle_id);
        self.inner
            .charges
            .write()
            .retain(|_, c| c.vehicle_id != vehicle_id);
        self.inner.health.write().remove(&vehicle_id);
        self.inner.vehicles.write().remove(&vehicle_id);
        Ok(())
    }
}

impl StoreSet for MemoryStore {
    fn snapshots(&self) -> &dyn SnapshotStore {
        self
    }
    fn drives(&self) -> &dyn DriveStore {
        self
    }
    fn charges(&self) -> &dyn ChargeStore {
        self
    }
    fn health(&self) -> &dyn HealthStore {
        self
    }
    fn vehicles(&self) -> &dyn VehicleStore {
        self
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn append(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        // Idempotent re-append: same (vehicle, timestamp) replaces in place
        self.inner
            .snapshots
            .write()
            .entry(snapshot.vehicle_id)
            .or_default()
            .insert(snapshot.recorded_at, snapshot.clone());
        Ok(())
    }

    async fn get_range(
        &self,
        vehicle_id: Uuid,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetrySnapshot>> {
        let guard = self.inner.snapshots.read();
        let Some(by_ts) = guard.get(&vehicle_id) else {
            return Ok(Vec::new());
        };
        let iter = by_ts.range(range.start..range.end).map(|(_, s)| s.clone());
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn get_latest(&self, vehicle_id: Uuid) -> Result<Option<TelemetrySnapshot>> {
        let guard = self.inner.snapshots.read();
        Ok(guard
            .get(&vehicle_id)
            .and_then(|by_ts| by_ts.values().next_back().cloned()))
    }
}

#[async_trait]
impl DriveStore for MemoryStore {
    async fn upsert(&self, drive: &Drive) -> Result<()> {
        self.inner.drives.write().insert(drive.id, drive.clone());
        Ok(())
    }

    async fn get_by_id(&self, drive_id: Uuid) -> Result<Option<Drive>> {
        Ok(self.inner.drives.read().get(&drive_id).cloned())
    }

    async fn get_active(&self, vehicle_id: Uuid) -> Result<Option<Drive>> {
        Ok(self
            .inner
            .drives
            .read()
            .values()
            .find(|d| d.vehicle_id == vehicle_id && d.is_active)
            .cloned())
    }

    async fn list_range(&self, vehicle_id: Uuid, range: TimeRange) -> Result<Vec<Drive>> {
        let mut drives: Vec<Drive> = self
            .inner
            .drives
            .read()
            .values()
            .filter(|d| d.vehicle_id == vehicle_id && range.contains(d.started_at))
            .cloned()
            .collect();
        drives.sort_by_key(|d| d.started_at);
        Ok(drives)
    }

    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()> {
        self.inner
            .drives
            .write()
            .retain(|_, d| d.vehicle_id != vehicle_id);
        Ok(())
    }
}

#[async_trait]
impl ChargeStore for MemoryStore {
    async fn upsert(&self, session: &ChargingSession) -> Result<()> {
        self.inner
            .charges
            .write()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_by_id(&self, session_id: Uuid) -> Result<Option<ChargingSession>> {
        Ok(self.inner.charges.read().get(&session_id).cloned())
    }

    async fn get_active(&self, vehicle_id: Uuid) -> Result<Option<ChargingSession>> {
        Ok(self
            .inner
            .charges
            .read()
            .values()
            .find(|c| c.vehicle_id == vehicle_id && c.is_active)
            .cloned())
    }

    async fn list_range(
        &self,
        vehicle_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<ChargingSession>> {
        let mut sessions: Vec<ChargingSession> = self
            .inner
            .charges
            .read()
            .values()
            .filter(|c| c.vehicle_id == vehicle_id && range.contains(c.started_at))
            .cloned()
            .collect();
        sessions.sort_by_key(|c| c.started_at);
        Ok(sessions)
    }

    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()> {
        self.inner
            .charges
            .write()
            .retain(|_, c| c.vehicle_id != vehicle_id);
        Ok(())
    }
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn append(&self, snapshot: &BatteryHealthSnapshot) -> Result<()> {
        let mut guard = self.inner.health.write();
        let history = guard.entry(snapshot.vehicle_id).or_default();
        history.push(snapshot.clone());
        history.sort_by_key(|h| h.recorded_at);
        Ok(())
    }

    async fn history(&self, vehicle_id: Uuid) -> Result<Vec<BatteryHealthSnapshot>> {
        Ok(self
            .inner
            .health
            .read()
            .get(&vehicle_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_latest(&self, vehicle_id: Uuid) -> Result<Option<BatteryHealthSnapshot>> {
        Ok(self
            .inner
            .health
            .read()
            .get(&vehicle_id)
            .and_then(|h| h.last().cloned()))
    }

    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()> {
        self.inner.health.write().remove(&vehicle_id);
        Ok(())
    }
}

#[async_trait]
impl VehicleStore for MemoryStore {
    async fn get_by_id(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>> {
        Ok(self.inner.vehicles.read().get(&vehicle_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> =
            self.inner.vehicles.read().values().cloned().collect();
        vehicles.sort_by_key(|v| v.created_at);
        Ok(vehicles)
    }

    async fn upsert(&self, vehicle: &Vehicle) -> Result<()> {
        self.inner
            .vehicles
            .write()
            .insert(vehicle.id, vehicle.clone());
        Ok(())
    }

    async fn delete(&self, vehicle_id: Uuid) -> Result<()> {
        self.inner.vehicles.write().remove(&vehicle_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ev_domain::{
        BatteryState, CellChemistry, ChargerState, ClimateState, ClosureState, GearState,
        GeoPoint, OtaState, PowerState, TirePressures,
    };

    fn snapshot_at(vehicle_id: Uuid, ts: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at: ts,
            location: GeoPoint::new(47.6, -122.3, 50.0),
            odometer_mi: 1000.0,
            battery: BatteryState {
                level_pct: 60.0,
                charge_limit_pct: 80.0,
                usable_capacity_kwh: None,
                chemistry: CellChemistry::Nmc,
            },
            range_estimate_mi: 180.0,
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
    async fn snapshot_append_is_idempotent() {
        let store = MemoryStore::new();
        let vehicle = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let snap = snapshot_at(vehicle, ts);

        SnapshotStore::append(&store, &snap).await.unwrap();
        SnapshotStore::append(&store, &snap).await.unwrap();

        let range = TimeRange {
            start: ts - chrono::Duration::hours(1),
            end: ts + chrono::Duration::hours(1),
        };
        let got = store.get_range(vehicle, range, None).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn active_drive_lookup() {
        let store = MemoryStore::new();
        let vehicle = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

        let mut drive = Drive {
            id: Uuid::new_v4(),
            vehicle_id: vehicle,
            started_at: ts,
            ended_at: None,
            is_active: true,
            start_odometer_mi: 100.0,
            end_odometer_mi: None,
            start_battery_level_pct: 80.0,
            end_battery_level_pct: None,
            distance_mi: 0.0,
            energy_used_kwh: 0.0,
            efficiency_mi_per_kwh: None,
            efficiency_wh_per_mi: None,
            start_latitude: 47.6,
            start_longitude: -122.3,
            end_latitude: None,
            end_longitude: None,
            max_speed_mph: 0.0,
            avg_speed_mph: 0.0,
            elevation_gain_m: 0.0,
            avg_outside_temp_c: None,
            drive_mode: None,
            positions: Vec::new(),
        };
        DriveStore::upsert(&store, &drive).await.unwrap();
        assert!(DriveStore::get_active(&store, vehicle).await.unwrap().is_some());

        drive.is_active = false;
        drive.ended_at = Some(ts + chrono::Duration::minutes(20));
        DriveStore::upsert(&store, &drive).await.unwrap();
        assert!(DriveStore::get_active(&store, vehicle).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_vehicle_cascades() {
        let store = MemoryStore::new();
        let vehicle = Uuid::new_v4();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

        SnapshotStore::append(&store, &snapshot_at(vehicle, ts)).await.unwrap();
        store.purge_vehicle(vehicle).await.unwrap();
        assert!(SnapshotStore::get_latest(&store, vehicle)
            .await
            .unwrap()
            .is_none());
    }
}
