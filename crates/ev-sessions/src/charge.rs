//! Charge state machine.
//!
//! Pure per-vehicle state machine mirroring the charger's reported state:
//! `Disconnected -> Connected -> Charging -> Complete/Disconnected`. Owns at
//! most one open [`ChargingSession`], performs no I/O.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use ev_domain::{ChargeType, ChargerState, ChargingSession, TelemetrySnapshot};

/// What a tick did to the open session
#[derive(Debug)]
pub enum ChargeOutcome {
    /// Nothing changed
    None,
    /// A session opened; read it via [`ChargeMachine::active`]
    Started,
    /// The open session was mutated; read it via [`ChargeMachine::active`]
    Updated,
    /// The open session closed
    Closed(ChargingSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargePhase {
    Disconnected,
    Connected,
    Charging,
    Complete,
}

/// Per-vehicle charge segmentation and pack-capacity calibration.
pub struct ChargeMachine {
    vehicle_id: Uuid,
    pack_capacity_kwh: f64,
    min_soc_delta_pct: f64,
    min_duration: Duration,

    phase: ChargePhase,
    current: Option<ChargingSession>,
    /// (timestamp, SoC) of the previous charging sample, for power inference
    last_sample: Option<(DateTime<Utc>, f64)>,
    /// Energy integrated from reported charge power, when available
    reported_energy_kwh: f64,
    saw_reported_power: bool,
}

impl ChargeMachine {
    #[must_use]
    pub fn new(
        vehicle_id: Uuid,
        pack_capacity_kwh: f64,
        min_soc_delta_pct: f64,
        min_duration: Duration,
    ) -> Self {
        Self {
            vehicle_id,
            pack_capacity_kwh,
            min_soc_delta_pct,
            min_duration,
            phase: ChargePhase::Disconnected,
            current: None,
            last_sample: None,
            reported_energy_kwh: 0.0,
            saw_reported_power: false,
        }
    }

    /// The open session, if any
    #[must_use]
    pub fn active(&self) -> Option<&ChargingSession> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn is_charging(&self) -> bool {
        self.phase == ChargePhase::Charging
    }

    /// Replace the capacity estimate used for energy conversion
    pub fn set_pack_capacity(&mut self, kwh: f64) {
        if kwh > 0.0 {
            self.pack_capacity_kwh = kwh;
        }
    }

    /// Adopt a session left open by a prior run.
    pub fn resume(&mut self, session: ChargingSession) {
        self.phase = ChargePhase::Charging;
        self.last_sample = Some((session.last_updated_at, session.current_battery_level_pct));
        self.reported_energy_kwh = 0.0;
        self.saw_reported_power = false;
        self.current = Some(session);
    }

    /// Consume one snapshot.
    pub fn observe(&mut self, snap: &TelemetrySnapshot) -> ChargeOutcome {
        // Missing required field or a fault report: no-op tick
        if matches!(snap.charger_state, ChargerState::Unknown | ChargerState::Fault) {
            return ChargeOutcome::None;
        }

        match self.phase {
            ChargePhase::Disconnected | ChargePhase::Complete => match snap.charger_state {
                ChargerState::Connected | ChargerState::ReadyToCharge => {
                    self.open(snap, ChargePhase::Connected);
                    ChargeOutcome::Started
                }
                ChargerState::Charging => {
                    self.open(snap, ChargePhase::Charging);
                    ChargeOutcome::Started
                }
                ChargerState::Disconnected => {
                    self.phase = ChargePhase::Disconnected;
                    ChargeOutcome::None
                }
                _ => ChargeOutcome::None,
            },

            ChargePhase::Connected => match snap.charger_state {
                ChargerState::Charging => {
                    self.phase = ChargePhase::Charging;
                    self.last_sample = Some((snap.recorded_at, snap.battery.level_pct));
                    self.update(snap);
                    ChargeOutcome::Updated
                }
                ChargerState::Complete => {
                    self.update(snap);
                    ChargeOutcome::Closed(self.close(snap, ChargePhase::Complete))
                }
                ChargerState::Disconnected => {
                    self.update(snap);
                    ChargeOutcome::Closed(self.close(snap, ChargePhase::Disconnected))
                }
                _ => {
                    self.update(snap);
                    ChargeOutcome::Updated
                }
            },

            ChargePhase::Charging => match snap.charger_state {
                ChargerState::Charging => {
                    self.track_power(snap);
                    self.update(snap);
                    ChargeOutcome::Updated
                }
                ChargerState::Complete => {
                    self.track_power(snap);
                    self.update(snap);
                    ChargeOutcome::Closed(self.close(snap, ChargePhase::Complete))
                }
                ChargerState::Disconnected => {
                    self.update(snap);
                    ChargeOutcome::Closed(self.close(snap, ChargePhase::Disconnected))
                }
                // Charging paused with cable still in
                ChargerState::Connected | ChargerState::ReadyToCharge => {
                    self.phase = ChargePhase::Connected;
                    self.update(snap);
                    ChargeOutcome::Updated
                }
                _ => ChargeOutcome::None,
            },
        }
    }

    /// Close the open session at its last observed update unconditionally.
    /// Used by startup reconciliation when the grace window has elapsed.
    pub fn force_close(&mut self) -> Option<ChargingSession> {
        let mut session = self.current.take()?;
        self.phase = ChargePhase::Disconnected;
        self.last_sample = None;

        session.ended_at = Some(session.last_updated_at);
        session.end_battery_level_pct = Some(session.current_battery_level_pct);
        session.is_active = false;

        let soc_delta = session.soc_delta_pct();
        let duration = session.last_updated_at - session.started_at;
        if soc_delta >= self.min_soc_delta_pct && duration >= self.min_duration {
            session.calculated_capacity_kwh =
                Some(session.energy_added_kwh / (soc_delta / 100.0));
            session.capacity_confidence = Some(Self::confidence(soc_delta, duration));
        }

        Some(session)
    }

    fn open(&mut self, snap: &TelemetrySnapshot, phase: ChargePhase) {
        self.phase = phase;
        self.last_sample = Some((snap.recorded_at, snap.battery.level_pct));
        self.reported_energy_kwh = 0.0;
        self.saw_reported_power = false;

        self.current = Some(ChargingSession {
            id: Uuid::new_v4(),
            vehicle_id: self.vehicle_id,
            started_at: snap.recorded_at,
            ended_at: None,
            is_active: true,
            start_battery_level_pct: snap.battery.level_pct,
            end_battery_level_pct: None,
            current_battery_level_pct: snap.battery.level_pct,
            charge_limit_pct: snap.battery.charge_limit_pct,
            charge_type: snap
                .charge_power_kw
                .map_or(ChargeType::Unknown, ChargeType::from_power_kw),
            energy_added_kwh: 0.0,
            peak_power_kw: 0.0,
            avg_power_kw: 0.0,
            start_range_estimate_mi: snap.range_estimate_mi,
            current_range_estimate_mi: snap.range_estimate_mi,
            range_added_mi: 0.0,
            latitude: snap.location.latitude,
            longitude: snap.location.longitude,
            user_location_id: None,
            calculated_capacity_kwh: None,
            capacity_confidence: None,
            last_updated_at: snap.recorded_at,
        });
    }

    /// Accumulate peak power from the reported charge rate if available,
    /// else inferred from the SoC/time delta.
    fn track_power(&mut self, snap: &TelemetrySnapshot) {
        let pack = self.pack_capacity_kwh;
        let inferred = self.last_sample.and_then(|(ts, soc)| {
            let hours = (snap.recorded_at - ts).num_seconds() as f64 / 3600.0;
            if hours > 0.0 {
                Some((snap.battery.level_pct - soc).max(0.0) / 100.0 * pack / hours)
            } else {
                None
            }
        });

        let power = match snap.charge_power_kw {
            Some(reported) => {
                if let Some((ts, _)) = self.last_sample {
                    let hours = (snap.recorded_at - ts).num_seconds() as f64 / 3600.0;
                    self.reported_energy_kwh += reported * hours;
                }
                self.saw_reported_power = true;
                Some(reported)
            }
            None => inferred,
        };

        self.last_sample = Some((snap.recorded_at, snap.battery.level_pct));

        if let (Some(p), Some(session)) = (power, self.current.as_mut()) {
            if p > session.peak_power_kw {
                session.peak_power_kw = p;
                if session.charge_type == ChargeType::Unknown
                    || snap.charge_power_kw.is_some()
                {
                    session.charge_type = ChargeType::from_power_kw(p);
                }
            }
        }
    }

    /// Refresh live-tracking fields so in-progress sessions stay queryable.
    fn update(&mut self, snap: &TelemetrySnapshot) {
        let pack = self.pack_capacity_kwh;
        let reported = self.reported_energy_kwh;
        let use_reported = self.saw_reported_power;

        let Some(session) = self.current.as_mut() else {
            return;
        };

        session.current_battery_level_pct = snap.battery.level_pct;
        session.current_range_estimate_mi = snap.range_estimate_mi;
        session.charge_limit_pct = snap.battery.charge_limit_pct;
        session.last_updated_at = snap.recorded_at;

        let soc_delta = session.soc_delta_pct().max(0.0);
        session.energy_added_kwh = if use_reported {
            reported
        } else {
            soc_delta / 100.0 * pack
        };
        session.range_added_mi =
            (session.current_range_estimate_mi - session.start_range_estimate_mi).max(0.0);

        let elapsed_h =
            (snap.recorded_at - session.started_at).num_seconds() as f64 / 3600.0;
        session.avg_power_kw = if elapsed_h > 0.0 {
            session.energy_added_kwh / elapsed_h
        } else {
            0.0
        };
    }

    fn close(&mut self, snap: &TelemetrySnapshot, next_phase: ChargePhase) -> ChargingSession {
        self.phase = next_phase;
        self.last_sample = None;
        let mut session = self.current.take().expect("close requires open session");

        session.ended_at = Some(snap.recorded_at);
        session.end_battery_level_pct = Some(snap.battery.level_pct);
        session.is_active = false;

        let soc_delta = session.soc_delta_pct();
        let duration = snap.recorded_at - session.started_at;
        if soc_delta >= self.min_soc_delta_pct && duration >= self.min_duration {
            session.calculated_capacity_kwh =
                Some(session.energy_added_kwh / (soc_delta / 100.0));
            session.capacity_confidence = Some(Self::confidence(soc_delta, duration));
        }

        session
    }

    /// Confidence grows with SoC delta and session duration, clamped to
    /// [0, 1]: 0.6 * min(dSoC, 40)/40 + 0.4 * min(hours, 4)/4.
    fn confidence(soc_delta_pct: f64, duration: Duration) -> f64 {
        let hours = duration.num_seconds() as f64 / 3600.0;
        let soc_term = 0.6 * (soc_delta_pct.min(40.0) / 40.0);
        let time_term = 0.4 * (hours.min(4.0) / 4.0);
        (soc_term + time_term).clamp(0.0, 1.0)
    }
}
