//! # EV Fleet Telemetry - Domain Model
//!
//! Core domain entities, value objects, and enums for electric-vehicle
//! telemetry ingestion and session derivation. These types are the single
//! source of truth across all layers: acquisition, persistence, and
//! analytics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic position with full motion vector data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub speed_mph: f32,
    pub heading_deg: f32,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            latitude: lat,
            longitude: lon,
            altitude_m: alt,
            speed_mph: 0.0,
            heading_deg: 0.0,
        }
    }

    /// Calculate great-circle distance to another point (Haversine formula)
    #[must_use]
    pub fn distance_to_mi(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_MI: f64 = 3958.8;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_MI * c
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            altitude_m: 0.0,
            speed_mph: 0.0,
            heading_deg: 0.0,
        }
    }
}

/// Battery state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub level_pct: f64,
    pub charge_limit_pct: f64,
    /// API-reported usable pack capacity, when the vendor exposes it
    pub usable_capacity_kwh: Option<f64>,
    pub chemistry: CellChemistry,
}

/// Cabin climate state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateState {
    pub inside_temp_c: Option<f32>,
    pub outside_temp_c: Option<f32>,
    pub hvac_on: bool,
}

/// Door/window/trunk closure state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClosureState {
    pub locked: bool,
    pub doors_open: bool,
    pub windows_open: bool,
    pub trunk_open: bool,
    pub frunk_open: bool,
}

/// Tire pressures in PSI, one per corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TirePressures {
    pub front_left: Option<f32>,
    pub front_right: Option<f32>,
    pub rear_left: Option<f32>,
    pub rear_right: Option<f32>,
}

/// Over-the-air update state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OtaState {
    pub firmware_version: Option<String>,
    pub update_status: Option<String>,
    pub update_version: Option<String>,
}

// =============================================================================
// ENUMS
// =============================================================================

/// Vehicle power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    #[default]
    Unknown,
    Sleep,
    Standby,
    Ready,
    Go,
    Charging,
}

impl PowerState {
    /// Awake-equivalent states poll on the short interval
    #[must_use]
    pub fn is_awake(&self) -> bool {
        matches!(self, Self::Ready | Self::Go | Self::Charging)
    }
}

/// Transmission gear state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GearState {
    #[default]
    Unknown,
    Park,
    Reverse,
    Neutral,
    Drive,
}

impl GearState {
    /// Gears that indicate the vehicle is in motion or about to move
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        matches!(self, Self::Drive | Self::Reverse | Self::Neutral)
    }
}

/// Charge cable / charger state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargerState {
    #[default]
    Unknown,
    Disconnected,
    Connected,
    ReadyToCharge,
    Charging,
    Complete,
    Fault,
}

/// Charge connection type, inferred from charge power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    #[default]
    Unknown,
    AcLevel1,
    AcLevel2,
    DcFast,
}

impl ChargeType {
    /// Classify from sustained charge power
    #[must_use]
    pub fn from_power_kw(power_kw: f64) -> Self {
        if power_kw > 22.0 {
            Self::DcFast
        } else if power_kw > 2.5 {
            Self::AcLevel2
        } else if power_kw > 0.0 {
            Self::AcLevel1
        } else {
            Self::Unknown
        }
    }
}

/// Battery cell chemistry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellChemistry {
    #[default]
    Unknown,
    Nmc,
    Lfp,
    Nca,
}

/// Battery pack variant, used for original-capacity lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackType {
    StandardRange,
    LongRange,
    Performance,
}

// =============================================================================
// TELEMETRY SNAPSHOT
// =============================================================================

/// One timestamped telemetry reading for a vehicle. Immutable once ingested.
///
/// Within one vehicle's stream as consumed by the derivation engine,
/// `recorded_at` is monotonically non-decreasing; out-of-order snapshots
/// are dropped upstream, not reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub vehicle_id: Uuid,
    pub recorded_at: DateTime<Utc>,

    // Position & movement
    pub location: GeoPoint,
    pub odometer_mi: f64,

    // Energy
    pub battery: BatteryState,
    pub range_estimate_mi: f64,

    // Drivetrain state
    pub power_state: PowerState,
    pub gear_state: GearState,
    pub drive_mode: Option<String>,

    // Charging
    pub charger_state: ChargerState,
    pub charge_port_open: bool,
    pub charge_power_kw: Option<f64>,

    // Body & environment
    pub climate: ClimateState,
    pub closures: ClosureState,
    pub tires: TirePressures,
    pub ota: OtaState,

    /// Raw upstream payload, retained verbatim for replay/debug
    pub raw: serde_json::Value,
}

impl TelemetrySnapshot {
    /// True when any observable field differs from `other`.
    ///
    /// `recorded_at` and `raw` are excluded: a fresh reading with identical
    /// vehicle state is not a state change.
    #[must_use]
    pub fn observably_differs(&self, other: &TelemetrySnapshot) -> bool {
        self.location != other.location
            || (self.odometer_mi - other.odometer_mi).abs() > f64::EPSILON
            || self.battery != other.battery
            || (self.range_estimate_mi - other.range_estimate_mi).abs() > f64::EPSILON
            || self.power_state != other.power_state
            || self.gear_state != other.gear_state
            || self.drive_mode != other.drive_mode
            || self.charger_state != other.charger_state
            || self.charge_port_open != other.charge_port_open
            || self.charge_power_kw != other.charge_power_kw
            || self.climate != other.climate
            || self.closures != other.closures
            || self.tires != other.tires
            || self.ota != other.ota
    }

    /// Awake-equivalent power states poll on the short interval
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.power_state.is_awake()
    }
}

// =============================================================================
// SESSION ENTITIES
// =============================================================================

/// One GPS sample owned by exactly one Drive. Append-only, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub drive_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub speed_mph: f32,
    pub heading_deg: f32,
    pub battery_level_pct: f64,
    pub odometer_mi: f64,
}

/// A driving session derived from the snapshot stream.
///
/// Created when the drive machine transitions Idle -> Driving, mutated on
/// each snapshot while driving, closed on Driving -> Idle or stream
/// termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    pub id: Uuid,
    pub vehicle_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub start_odometer_mi: f64,
    pub end_odometer_mi: Option<f64>,
    pub start_battery_level_pct: f64,
    pub end_battery_level_pct: Option<f64>,

    pub distance_mi: f64,
    pub energy_used_kwh: f64,
    pub efficiency_mi_per_kwh: Option<f64>,
    pub efficiency_wh_per_mi: Option<f64>,

    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,

    pub max_speed_mph: f32,
    pub avg_speed_mph: f32,
    pub elevation_gain_m: f64,
    pub avg_outside_temp_c: Option<f32>,
    pub drive_mode: Option<String>,

    /// Ordered GPS trail, one sample per snapshot consumed while driving
    pub positions: Vec<Position>,
}

impl Drive {
    /// Elapsed duration, using `ended_at` when closed or `now` while active
    #[must_use]
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// A charging session derived from the snapshot stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub id: Uuid,
    pub vehicle_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub start_battery_level_pct: f64,
    pub end_battery_level_pct: Option<f64>,
    /// Live level while charging, updated every snapshot
    pub current_battery_level_pct: f64,
    pub charge_limit_pct: f64,
    pub charge_type: ChargeType,

    pub energy_added_kwh: f64,
    pub peak_power_kw: f64,
    pub avg_power_kw: f64,

    pub start_range_estimate_mi: f64,
    pub current_range_estimate_mi: f64,
    pub range_added_mi: f64,

    pub latitude: f64,
    pub longitude: f64,
    /// Link to a saved user location, resolved by collaborators
    pub user_location_id: Option<Uuid>,

    /// Pack capacity implied by this session, when calibration thresholds met
    pub calculated_capacity_kwh: Option<f64>,
    pub capacity_confidence: Option<f64>,

    pub last_updated_at: DateTime<Utc>,
}

impl ChargingSession {
    /// SoC gained so far, in percentage points
    #[must_use]
    pub fn soc_delta_pct(&self) -> f64 {
        self.current_battery_level_pct - self.start_battery_level_pct
    }
}

// =============================================================================
// BATTERY HEALTH
// =============================================================================

/// One battery-health observation plus trend projections computed at
/// creation time from the snapshot history. Appended periodically, never
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryHealthSnapshot {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub odometer_mi: f64,

    pub reported_capacity_kwh: f64,
    pub original_capacity_kwh: f64,
    /// reported / original x 100
    pub health_pct: f64,
    pub degradation_pct: f64,

    /// Linear-regression trend over trailing snapshots; `None` when the
    /// regression is degenerate
    pub degradation_rate_pct_per_10k_mi: Option<f64>,
    pub projected_health_at_100k_pct: Option<f64>,
    pub projected_miles_to_warranty_floor: Option<f64>,
}

// =============================================================================
// VEHICLE
// =============================================================================

/// A tracked vehicle. Owns all of its Drives, ChargingSessions, Positions,
/// and BatteryHealthSnapshots (cascade-delete semantics in the stores).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    /// Nullable owner permitted for legacy/unclaimed data
    pub owner_account_id: Option<Uuid>,
    pub display_name: String,
    pub vin: Option<String>,
    pub model_year: i32,
    pub pack: PackType,
    pub chemistry: CellChemistry,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// QUERY/FILTER TYPES
// =============================================================================

/// Time range filter for queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid battery level: {0}")]
    InvalidBatteryLevel(f64),

    #[error("Session validation failed: {0}")]
    SessionValidation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(vehicle_id: Uuid) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at: Utc::now(),
            location: GeoPoint::new(47.61, -122.33, 56.0),
            odometer_mi: 12_000.0,
            battery: BatteryState {
                level_pct: 72.0,
                charge_limit_pct: 80.0,
                usable_capacity_kwh: Some(74.5),
                chemistry: CellChemistry::Nmc,
            },
            range_estimate_mi: 210.0,
            power_state: PowerState::Standby,
            gear_state: GearState::Park,
            drive_mode: None,
            charger_state: ChargerState::Disconnected,
            charge_port_open: false,
            charge_power_kw: None,
            climate: ClimateState {
                inside_temp_c: Some(21.0),
                outside_temp_c: Some(14.0),
                hvac_on: false,
            },
            closures: ClosureState::default(),
            tires: TirePressures::default(),
            ota: OtaState::default(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn haversine_distance_seattle_portland() {
        let seattle = GeoPoint::new(47.6062, -122.3321, 56.0);
        let portland = GeoPoint::new(45.5152, -122.6784, 15.0);
        let d = seattle.distance_to_mi(&portland);
        assert!((d - 145.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn identical_snapshots_do_not_observably_differ() {
        let a = snapshot(Uuid::new_v4());
        let mut b = a.clone();
        b.recorded_at = b.recorded_at + Duration::seconds(30);
        b.raw = serde_json::json!({"seq": 2});
        assert!(!a.observably_differs(&b));
    }

    #[test]
    fn battery_level_change_observably_differs() {
        let a = snapshot(Uuid::new_v4());
        let mut b = a.clone();
        b.battery.level_pct = 71.0;
        assert!(a.observably_differs(&b));
    }

    #[test]
    fn awake_equivalent_power_states() {
        assert!(PowerState::Ready.is_awake());
        assert!(PowerState::Go.is_awake());
        assert!(PowerState::Charging.is_awake());
        assert!(!PowerState::Sleep.is_awake());
        assert!(!PowerState::Standby.is_awake());
        assert!(!PowerState::Unknown.is_awake());
    }

    #[test]
    fn charge_type_classification() {
        assert_eq!(ChargeType::from_power_kw(150.0), ChargeType::DcFast);
        assert_eq!(ChargeType::from_power_kw(11.0), ChargeType::AcLevel2);
        assert_eq!(ChargeType::from_power_kw(1.4), ChargeType::AcLevel1);
        assert_eq!(ChargeType::from_power_kw(0.0), ChargeType::Unknown);
    }

    #[test]
    fn enum_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ChargerState::ReadyToCharge).unwrap();
        assert_eq!(json, "\"READY_TO_CHARGE\"");
        let back: ChargerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChargerState::ReadyToCharge);
    }
}
