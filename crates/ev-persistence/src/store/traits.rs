//! # Store Traits
//!
//! Abstract store interfaces for domain entities. Implementations can be
//! swapped for different backends (SQL, time-series engine, in-memory).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use ev_domain::{
    BatteryHealthSnapshot, ChargingSession, Drive, TelemetrySnapshot, TimeRange, Vehicle,
};

// =============================================================================
// SNAPSHOT STORE
// =============================================================================

/// Append-only store for raw telemetry snapshots, keyed by
/// (vehicle, timestamp). Re-appending an existing key is idempotent.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append one snapshot
    async fn append(&self, snapshot: &TelemetrySnapshot) -> Result<()>;

    /// Get snapshots for a vehicle within a time range, ascending
    async fn get_range(
        &self,
        vehicle_id: Uuid,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetrySnapshot>>;

    /// Get the most recent snapshot for a vehicle
    async fn get_latest(&self, vehicle_id: Uuid) -> Result<Option<TelemetrySnapshot>>;
}

// =============================================================================
// DRIVE STORE
// =============================================================================

/// Upsert-capable store for driving sessions with fast active lookup
#[async_trait]
pub trait DriveStore: Send + Sync {
    /// Insert or replace a drive by id
    async fn upsert(&self, drive: &Drive) -> Result<()>;

    /// Get drive by id
    async fn get_by_id(&self, drive_id: Uuid) -> Result<Option<Drive>>;

    /// Get the currently open drive for a vehicle, if any
    async fn get_active(&self, vehicle_id: Uuid) -> Result<Option<Drive>>;

    /// List drives for a vehicle whose start falls in the range, ascending
    async fn list_range(&self, vehicle_id: Uuid, range: TimeRange) -> Result<Vec<Drive>>;

    /// Delete all drives for a vehicle (cascade from vehicle removal)
    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()>;
}

// =============================================================================
// CHARGE STORE
// =============================================================================

/// Upsert-capable store for charging sessions with fast active lookup
#[async_trait]
pub trait ChargeStore: Send + Sync {
    /// Insert or replace a session by id
    async fn upsert(&self, session: &ChargingSession) -> Result<()>;

    /// Get session by id
    async fn get_by_id(&self, session_id: Uuid) -> Result<Option<ChargingSession>>;

    /// Get the currently open session for a vehicle, if any
    async fn get_active(&self, vehicle_id: Uuid) -> Result<Option<ChargingSession>>;

    /// List sessions for a vehicle whose start falls in the range, ascending
    async fn list_range(
        &self,
        vehicle_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<ChargingSession>>;

    /// Delete all sessions for a vehicle (cascade from vehicle removal)
    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()>;
}

// =============================================================================
// HEALTH STORE
// =============================================================================

/// Append-only store for battery-health snapshots, ordered by timestamp
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Append one health snapshot
    async fn append(&self, snapshot: &BatteryHealthSnapshot) -> Result<()>;

    /// Full history for a vehicle, ascending by timestamp
    async fn history(&self, vehicle_id: Uuid) -> Result<Vec<BatteryHealthSnapshot>>;

    /// Most recent health snapshot for a vehicle
    async fn get_latest(&self, vehicle_id: Uuid) -> Result<Option<BatteryHealthSnapshot>>;

    /// Delete all health snapshots for a vehicle
    async fn delete_by_vehicle(&self, vehicle_id: Uuid) -> Result<()>;
}

// =============================================================================
// VEHICLE STORE
// =============================================================================

/// Registry of tracked vehicles
#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Get vehicle by id
    async fn get_by_id(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>>;

    /// All registered vehicles
    async fn list(&self) -> Result<Vec<Vehicle>>;

    /// Insert or replace a vehicle
    async fn upsert(&self, vehicle: &Vehicle) -> Result<()>;

    /// Remove a vehicle; owned sessions/snapshots are purged by the caller
    /// through the other stores
    async fn delete(&self, vehicle_id: Uuid) -> Result<()>;
}

/// Convenience trait bundling every store behind one handle
pub trait StoreSet: Send + Sync {
    fn snapshots(&self) -> &dyn SnapshotStore;
    fn drives(&self) -> &dyn DriveStore;
    fn charges(&self) -> &dyn ChargeStore;
    fn health(&self) -> &dyn HealthStore;
    fn vehicles(&self) -> &dyn VehicleStore;
}
