//! Drive state machine.
//!
//! Pure per-vehicle state machine: consumes snapshots in arrival order,
//! owns at most one open [`Drive`], performs no I/O. The engine persists
//! whatever the machine reports.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use ev_domain::{Drive, GearState, Position, PowerState, TelemetrySnapshot};

/// What a tick did to the open drive
#[derive(Debug)]
pub enum DriveOutcome {
    /// Nothing changed
    None,
    /// A drive opened; read it via [`DriveMachine::active`]
    Started,
    /// The open drive was mutated; read it via [`DriveMachine::active`]
    Updated,
    /// The open drive closed
    Closed(Drive),
    /// A stale drive was force-closed and a new one opened in the same tick
    ClosedAndStarted(Drive),
}

/// Per-vehicle drive segmentation.
///
/// States: `Idle` (no open drive) and `Driving` (one open drive). Entry on
/// gear engaged while power Ready/Go, or odometer movement while idle; exit
/// on gear Park with power leaving Ready/Go, or a snapshot gap exceeding the
/// idle timeout.
pub struct DriveMachine {
    vehicle_id: Uuid,
    pack_capacity_kwh: f64,
    idle_timeout: Duration,

    current: Option<Drive>,
    /// Last snapshot essentials observed while idle, for odometer-based entry
    last_idle: Option<(DateTime<Utc>, f64)>,
    /// Altitude of the previous sample while driving, for elevation gain
    last_altitude_m: f64,
    temp_sum_c: f64,
    temp_samples: u32,
}

impl DriveMachine {
    #[must_use]
    pub fn new(vehicle_id: Uuid, pack_capacity_kwh: f64, idle_timeout: Duration) -> Self {
        Self {
            vehicle_id,
            pack_capacity_kwh,
            idle_timeout,
            current: None,
            last_idle: None,
            last_altitude_m: 0.0,
            temp_sum_c: 0.0,
            temp_samples: 0,
        }
    }

    /// The open drive, if any
    #[must_use]
    pub fn active(&self) -> Option<&Drive> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn is_driving(&self) -> bool {
        self.current.is_some()
    }

    /// Replace the capacity estimate used for energy conversion
    pub fn set_pack_capacity(&mut self, kwh: f64) {
        if kwh > 0.0 {
            self.pack_capacity_kwh = kwh;
        }
    }

    /// Adopt a drive left open by a prior run; the next snapshot updates it
    /// in place.
    pub fn resume(&mut self, drive: Drive) {
        self.last_altitude_m = drive
            .positions
            .last()
            .map_or(0.0, |p| p.altitude_m);
        if let Some(avg) = drive.avg_outside_temp_c {
            self.temp_samples = drive.positions.len() as u32;
            self.temp_sum_c = f64::from(avg) * f64::from(self.temp_samples);
        }
        self.current = Some(drive);
    }

    /// Consume one snapshot.
    pub fn observe(&mut self, snap: &TelemetrySnapshot) -> DriveOutcome {
        // Missing required fields: no-op tick, no partial mutation
        if snap.gear_state == GearState::Unknown || snap.power_state == PowerState::Unknown {
            return DriveOutcome::None;
        }

        if self.current.is_some() {
            // A gap longer than the idle timeout means the drive ended at the
            // last known snapshot, not at this one
            if self.gap_exceeded(snap.recorded_at) {
                let closed = self.close_at_last_sample();
                return match self.observe_idle(snap) {
                    DriveOutcome::Started => DriveOutcome::ClosedAndStarted(closed),
                    _ => DriveOutcome::Closed(closed),
                };
            }

            let parked = snap.gear_state == GearState::Park
                && !matches!(snap.power_state, PowerState::Ready | PowerState::Go);
            if parked {
                self.update(snap);
                let closed = self.close_with(snap);
                self.last_idle = Some((snap.recorded_at, snap.odometer_mi));
                return DriveOutcome::Closed(closed);
            }

            self.update(snap);
            DriveOutcome::Updated
        } else {
            self.observe_idle(snap)
        }
    }

    /// Close the open drive if no snapshot has arrived within the idle
    /// timeout as of `now`. Used by the engine's periodic sweep.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> Option<Drive> {
        if self.current.is_some() && self.gap_exceeded(now) {
            Some(self.close_at_last_sample())
        } else {
            None
        }
    }

    /// Close the open drive at its last recorded sample unconditionally.
    /// Used by startup reconciliation when the grace window has elapsed.
    pub fn force_close(&mut self) -> Option<Drive> {
        if self.current.is_some() {
            Some(self.close_at_last_sample())
        } else {
            None
        }
    }

    fn observe_idle(&mut self, snap: &TelemetrySnapshot) -> DriveOutcome {
        let gear_entry = snap.gear_state.is_engaged()
            && matches!(snap.power_state, PowerState::Ready | PowerState::Go);
        let odometer_entry = self
            .last_idle
            .is_some_and(|(_, odo)| snap.odometer_mi > odo + 0.05);

        if gear_entry || odometer_entry {
            self.open(snap);
            DriveOutcome::Started
        } else {
            self.last_idle = Some((snap.recorded_at, snap.odometer_mi));
            DriveOutcome::None
        }
    }

    fn open(&mut self, snap: &TelemetrySnapshot) {
        let drive_id = Uuid::new_v4();
        self.last_altitude_m = snap.location.altitude_m;
        self.temp_sum_c = 0.0;
        self.temp_samples = 0;

        let mut drive = Drive {
            id: drive_id,
            vehicle_id: self.vehicle_id,
            started_at: snap.recorded_at,
            ended_at: None,
            is_active: true,
            start_odometer_mi: snap.odometer_mi,
            end_odometer_mi: None,
            start_battery_level_pct: snap.battery.level_pct,
            end_battery_level_pct: None,
            distance_mi: 0.0,
            energy_used_kwh: 0.0,
            efficiency_mi_per_kwh: None,
            efficiency_wh_per_mi: None,
            start_latitude: snap.location.latitude,
            start_longitude: snap.location.longitude,
            end_latitude: None,
            end_longitude: None,
            max_speed_mph: 0.0,
            avg_speed_mph: 0.0,
            elevation_gain_m: 0.0,
            avg_outside_temp_c: None,
            drive_mode: snap.drive_mode.clone(),
            positions: Vec::new(),
        };
        drive.positions.push(Self::position(drive_id, snap));
        self.accumulate_temp(snap);
        drive.avg_outside_temp_c = self.avg_temp();
        drive.max_speed_mph = snap.location.speed_mph;
        self.current = Some(drive);
    }

    fn update(&mut self, snap: &TelemetrySnapshot) {
        self.accumulate_temp(snap);
        let avg_temp = self.avg_temp();
        let altitude_delta = snap.location.altitude_m - self.last_altitude_m;
        self.last_altitude_m = snap.location.altitude_m;
        let pack = self.pack_capacity_kwh;

        let Some(drive) = self.current.as_mut() else {
            return;
        };

        drive.positions.push(Self::position(drive.id, snap));

        drive.distance_mi = (snap.odometer_mi - drive.start_odometer_mi).max(0.0);
        drive.max_speed_mph = drive.max_speed_mph.max(snap.location.speed_mph);

        // Average speed is distance over elapsed time, recomputed each tick
        let elapsed_h =
            (snap.recorded_at - drive.started_at).num_seconds() as f64 / 3600.0;
        drive.avg_speed_mph = if elapsed_h > 0.0 {
            (drive.distance_mi / elapsed_h) as f32
        } else {
            0.0
        };

        // Elevation gain counts positive deltas only
        if altitude_delta > 0.0 {
            drive.elevation_gain_m += altitude_delta;
        }

        let soc_drop = (drive.start_battery_level_pct - snap.battery.level_pct).max(0.0);
        drive.energy_used_kwh = soc_drop / 100.0 * pack;

        drive.efficiency_mi_per_kwh = if drive.energy_used_kwh > 0.0 {
            Some(drive.distance_mi / drive.energy_used_kwh)
        } else {
            None
        };
        drive.efficiency_wh_per_mi = if drive.distance_mi > 0.0 {
            Some(drive.energy_used_kwh * 1000.0 / drive.distance_mi)
        } else {
            None
        };

        drive.avg_outside_temp_c = avg_temp;
    }

    fn close_with(&mut self, snap: &TelemetrySnapshot) -> Drive {
        let mut drive = self.current.take().expect("close_with requires open drive");
        drive.ended_at = Some(snap.recorded_at);
        drive.end_odometer_mi = Some(snap.odometer_mi);
        drive.end_battery_level_pct = Some(snap.battery.level_pct);
        drive.end_latitude = Some(snap.location.latitude);
        drive.end_longitude = Some(snap.location.longitude);
        drive.is_active = false;
        drive
    }

    /// Close using the last recorded position, for timeout/reconciliation
    /// paths where the trigger is a clock tick rather than a snapshot.
    fn close_at_last_sample(&mut self) -> Drive {
        let mut drive = self
            .current
            .take()
            .expect("close_at_last_sample requires open drive");
        let last = drive.positions.last().copied();
        drive.ended_at = Some(last.map_or(drive.started_at, |p| p.recorded_at));
        drive.end_odometer_mi = Some(last.map_or(drive.start_odometer_mi, |p| p.odometer_mi));
        drive.end_battery_level_pct =
            Some(last.map_or(drive.start_battery_level_pct, |p| p.battery_level_pct));
        drive.end_latitude = Some(last.map_or(drive.start_latitude, |p| p.latitude));
        drive.end_longitude = Some(last.map_or(drive.start_longitude, |p| p.longitude));
        drive.is_active = false;
        if let Some((ts, odo)) = last.map(|p| (p.recorded_at, p.odometer_mi)) {
            self.last_idle = Some((ts, odo));
        }
        drive
    }

    fn gap_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.current
            .as_ref()
            .and_then(|d| d.positions.last())
            .is_some_and(|p| now - p.recorded_at > self.idle_timeout)
    }

    fn accumulate_temp(&mut self, snap: &TelemetrySnapshot) {
        if let Some(t) = snap.climate.outside_temp_c {
            self.temp_sum_c += f64::from(t);
            self.temp_samples += 1;
        }
    }

    fn avg_temp(&self) -> Option<f32> {
        if self.temp_samples > 0 {
            Some((self.temp_sum_c / f64::from(self.temp_samples)) as f32)
        } else {
            None
        }
    }

    fn position(drive_id: Uuid, snap: &TelemetrySnapshot) -> Position {
        Position {
            drive_id,
            recorded_at: snap.recorded_at,
            latitude: snap.location.latitude,
            longitude: snap.location.longitude,
            altitude_m: snap.location.altitude_m,
            speed_mph: snap.location.speed_mph,
            heading_deg: snap.location.heading_deg,
            battery_level_pct: snap.battery.level_pct,
            odometer_mi: snap.odometer_mi,
        }
    }
}
