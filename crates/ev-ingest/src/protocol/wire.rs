//! Wire schema for the vehicle-cloud API.
//!
//! The message vocabulary (handshake/subscribe/data/keep-alive/complete/
//! error, correlated by an `id` field) and the vehicle-state document are
//! vendor-specific and isolated here so the vendor can be swapped without
//! touching the rest of the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ev_domain::{
    BatteryState, CellChemistry, ChargerState, ClimateState, ClosureState, GearState, GeoPoint,
    OtaState, PowerState, TelemetrySnapshot, TirePressures,
};

/// One protocol frame, JSON with a `type` tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client -> server, first frame after transport connect
    ConnectionInit { payload: serde_json::Value },
    /// Server -> client handshake acknowledgment
    ConnectionAck,
    /// Client -> server, open one vehicle subscription
    Subscribe { id: String, payload: SubscribePayload },
    /// Server -> client telemetry delivery
    Data { id: String, payload: serde_json::Value },
    /// Server-initiated keep-alive; must be answered with `Pong` immediately
    Ping,
    Pong,
    /// Either direction: subscription finished
    Complete { id: String },
    /// Server -> client error; `id` is absent for connection-level errors
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        payload: ErrorPayload,
    },
}

/// Subscription request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub vehicle_id: Uuid,
    pub properties: Vec<String>,
}

/// Error frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    /// Authentication failures are fatal for the subscription, not retried
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self.code.as_str(), "UNAUTHENTICATED" | "TOKEN_EXPIRED")
    }
}

/// The vendor's vehicle-state document, carried in data frames and poll
/// responses alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleStateWire {
    pub timestamp: DateTime<Utc>,

    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default)]
    pub speed_mph: f32,
    #[serde(default)]
    pub heading_deg: f32,

    pub battery_level_pct: f64,
    #[serde(default)]
    pub charge_limit_pct: f64,
    #[serde(default)]
    pub usable_capacity_kwh: Option<f64>,
    #[serde(default)]
    pub chemistry: CellChemistry,

    pub range_estimate_mi: f64,
    pub odometer_mi: f64,

    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub gear_state: GearState,
    #[serde(default)]
    pub drive_mode: Option<String>,

    #[serde(default)]
    pub charger_state: ChargerState,
    #[serde(default)]
    pub charge_port_open: bool,
    #[serde(default)]
    pub charge_power_kw: Option<f64>,

    #[serde(default)]
    pub inside_temp_c: Option<f32>,
    #[serde(default)]
    pub outside_temp_c: Option<f32>,
    #[serde(default)]
    pub hvac_on: bool,

    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub doors_open: bool,
    #[serde(default)]
    pub windows_open: bool,
    #[serde(default)]
    pub trunk_open: bool,
    #[serde(default)]
    pub frunk_open: bool,

    #[serde(default)]
    pub tire_pressure_fl_psi: Option<f32>,
    #[serde(default)]
    pub tire_pressure_fr_psi: Option<f32>,
    #[serde(default)]
    pub tire_pressure_rl_psi: Option<f32>,
    #[serde(default)]
    pub tire_pressure_rr_psi: Option<f32>,

    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub update_status: Option<String>,
    #[serde(default)]
    pub update_version: Option<String>,
}

impl VehicleStateWire {
    /// Convert to the canonical snapshot, retaining the raw payload
    /// verbatim for replay/debug.
    #[must_use]
    pub fn into_snapshot(self, vehicle_id: Uuid, raw: serde_json::Value) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at: self.timestamp,
            location: GeoPoint {
                latitude: self.latitude,
                longitude: self.longitude,
                altitude_m: self.altitude_m,
                speed_mph: self.speed_mph,
                heading_deg: self.heading_deg,
            },
            odometer_mi: self.odometer_mi,
            battery: BatteryState {
                level_pct: self.battery_level_pct,
                charge_limit_pct: self.charge_limit_pct,
                usable_capacity_kwh: self.usable_capacity_kwh,
                chemistry: self.chemistry,
            },
            range_estimate_mi: self.range_estimate_mi,
            power_state: self.power_state,
            gear_state: self.gear_state,
            drive_mode: self.drive_mode,
            charger_state: self.charger_state,
            charge_port_open: self.charge_port_open,
            charge_power_kw: self.charge_power_kw,
            climate: ClimateState {
                inside_temp_c: self.inside_temp_c,
                outside_temp_c: self.outside_temp_c,
                hvac_on: self.hvac_on,
            },
            closures: ClosureState {
                locked: self.locked,
                doors_open: self.doors_open,
                windows_open: self.windows_open,
                trunk_open: self.trunk_open,
                frunk_open: self.frunk_open,
            },
            tires: TirePressures {
                front_left: self.tire_pressure_fl_psi,
                front_right: self.tire_pressure_fr_psi,
                rear_left: self.tire_pressure_rl_psi,
                rear_right: self.tire_pressure_rr_psi,
            },
            ota: OtaState {
                firmware_version: self.firmware_version,
                update_status: self.update_status,
                update_version: self.update_version,
            },
            raw,
        }
    }
}

/// Parse a data-frame payload into a snapshot, keeping the raw document.
pub fn parse_data_payload(
    vehicle_id: Uuid,
    payload: serde_json::Value,
) -> Result<TelemetrySnapshot, serde_json::Error> {
    let wire: VehicleStateWire = serde_json::from_value(payload.clone())?;
    Ok(wire.into_snapshot(vehicle_id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::Subscribe {
            id: "sub-1".into(),
            payload: SubscribePayload {
                vehicle_id: Uuid::new_v4(),
                properties: vec!["battery".into(), "location".into()],
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"subscribe\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Frame::Subscribe { id, .. } if id == "sub-1"));
    }

    #[test]
    fn connection_level_error_has_no_id() {
        let json = r#"{"type":"error","payload":{"code":"TOKEN_EXPIRED","message":"expired"}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::Error { id, payload } => {
                assert!(id.is_none());
                assert!(payload.is_auth_error());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn data_payload_parses_with_defaults_and_keeps_raw() {
        let vehicle_id = Uuid::new_v4();
        let payload = json!({
            "timestamp": "2026-03-01T09:00:00Z",
            "latitude": 47.6,
            "longitude": -122.3,
            "battery_level_pct": 64.0,
            "range_estimate_mi": 190.0,
            "odometer_mi": 12345.0,
            "power_state": "READY",
            "gear_state": "DRIVE"
        });

        let snap = parse_data_payload(vehicle_id, payload.clone()).unwrap();
        assert_eq!(snap.vehicle_id, vehicle_id);
        assert_eq!(snap.power_state, PowerState::Ready);
        assert_eq!(snap.gear_state, GearState::Drive);
        assert_eq!(snap.charger_state, ChargerState::Unknown);
        assert_eq!(snap.raw, payload);
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        let result = parse_data_payload(Uuid::new_v4(), json!({"garbage": true}));
        assert!(result.is_err());
    }
}
