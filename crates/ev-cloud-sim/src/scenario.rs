//! Scripted vehicle scenarios.
//!
//! Each simulated vehicle runs a repeating park / drive / park / charge
//! cycle with noisy telemetry, emitting one vehicle-state document per
//! tick in the same JSON shape the real cloud serves.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};
use uuid::Uuid;

/// One leg of the daily cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parked,
    Driving,
    Charging,
}

/// Phase script entry: what to do and for how many ticks
#[derive(Debug, Clone, Copy)]
struct Leg {
    phase: Phase,
    ticks: u32,
}

const CYCLE: [Leg; 4] = [
    Leg { phase: Phase::Parked, ticks: 20 },
    Leg { phase: Phase::Driving, ticks: 60 },
    Leg { phase: Phase::Parked, ticks: 10 },
    Leg { phase: Phase::Charging, ticks: 50 },
];

/// One simulated vehicle advancing through the cycle tick by tick.
pub struct VehicleScenario {
    pub vehicle_id: Uuid,

    leg_index: usize,
    ticks_in_leg: u32,

    soc_pct: f64,
    charge_limit_pct: f64,
    odometer_mi: f64,
    latitude: f64,
    longitude: f64,
    heading_deg: f32,
    speed_mph: f32,
    charge_power_kw: f64,

    /// Seconds of simulated time per tick
    tick_secs: f64,

    rng: StdRng,
    noise: Normal<f64>,
}

impl VehicleScenario {
    #[must_use]
    pub fn new(vehicle_id: Uuid, tick_secs: f64) -> Self {
        let mut rng = StdRng::from_entropy();
        let latitude = 47.60 + rng.gen_range(-0.05..0.05);
        let longitude = -122.33 + rng.gen_range(-0.05..0.05);
        Self {
            vehicle_id,
            leg_index: 0,
            ticks_in_leg: 0,
            soc_pct: rng.gen_range(45.0..75.0),
            charge_limit_pct: 80.0,
            odometer_mi: rng.gen_range(5_000.0..60_000.0),
            latitude,
            longitude,
            heading_deg: 0.0,
            speed_mph: 0.0,
            charge_power_kw: 0.0,
            tick_secs,
            rng,
            noise: Normal::new(0.0, 1.0).unwrap(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        CYCLE[self.leg_index].phase
    }

    /// Advance one tick and return the resulting state document.
    pub fn tick(&mut self) -> Value {
        self.ticks_in_leg += 1;
        if self.ticks_in_leg >= CYCLE[self.leg_index].ticks {
            self.leg_index = (self.leg_index + 1) % CYCLE.len();
            self.ticks_in_leg = 0;
        }

        match self.phase() {
            Phase::Parked => self.tick_parked(),
            Phase::Driving => self.tick_driving(),
            Phase::Charging => self.tick_charging(),
        }
        self.state_document()
    }

    fn tick_parked(&mut self) {
        self.speed_mph = 0.0;
        self.charge_power_kw = 0.0;
    }

    fn tick_driving(&mut self) {
        self.speed_mph = (35.0 + self.noise.sample(&mut self.rng) * 8.0).clamp(5.0, 75.0) as f32;
        let hours = self.tick_secs / 3600.0;
        let distance = f64::from(self.speed_mph) * hours;
        self.odometer_mi += distance;

        // ~3.5 mi/kWh on a 75 kWh pack
        self.soc_pct = (self.soc_pct - distance / 3.5 / 75.0 * 100.0).max(2.0);

        self.heading_deg = (self.heading_deg + self.rng.gen_range(-10.0..10.0)).rem_euclid(360.0);
        let rad = f64::from(self.heading_deg).to_radians();
        self.latitude += rad.cos() * distance / 69.0;
        self.longitude += rad.sin() * distance / 47.0;
        self.charge_power_kw = 0.0;
    }

    fn tick_charging(&mut self) {
        self.speed_mph = 0.0;
        if self.soc_pct >= self.charge_limit_pct {
            self.charge_power_kw = 0.0;
            return;
        }
        self.charge_power_kw = (11.0 + self.noise.sample(&mut self.rng) * 0.5).max(1.0);
        let hours = self.tick_secs / 3600.0;
        self.soc_pct =
            (self.soc_pct + self.charge_power_kw * hours / 75.0 * 100.0).min(self.charge_limit_pct);
    }

    /// Current state in the wire document shape.
    #[must_use]
    pub fn state_document(&self) -> Value {
        let (power_state, gear_state, charger_state) = match self.phase() {
            Phase::Parked => ("STANDBY", "PARK", "DISCONNECTED"),
            Phase::Driving => ("GO", "DRIVE", "DISCONNECTED"),
            Phase::Charging if self.soc_pct >= self.charge_limit_pct => {
                ("STANDBY", "PARK", "COMPLETE")
            }
            Phase::Charging => ("CHARGING", "PARK", "CHARGING"),
        };

        json!({
            "timestamp": Utc::now(),
            "latitude": self.latitude,
            "longitude": self.longitude,
            "altitude_m": 52.0,
            "speed_mph": self.speed_mph,
            "heading_deg": self.heading_deg,
            "battery_level_pct": self.soc_pct,
            "charge_limit_pct": self.charge_limit_pct,
            "usable_capacity_kwh": 74.5,
            "chemistry": "NMC",
            "range_estimate_mi": self.soc_pct / 100.0 * 260.0,
            "odometer_mi": self.odometer_mi,
            "power_state": power_state,
            "gear_state": gear_state,
            "charger_state": charger_state,
            "charge_port_open": charger_state != "DISCONNECTED",
            "charge_power_kw": if self.charge_power_kw > 0.0 {
                Some(self.charge_power_kw)
            } else {
                None
            },
            "outside_temp_c": 14.0,
            "locked": true,
            "firmware_version": "2026.8.3",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_walks_through_all_phases() {
        let mut scenario = VehicleScenario::new(Uuid::new_v4(), 60.0);
        let mut seen = Vec::new();
        for _ in 0..CYCLE.iter().map(|l| l.ticks).sum::<u32>() {
            scenario.tick();
            if seen.last() != Some(&scenario.phase()) {
                seen.push(scenario.phase());
            }
        }
        assert!(seen.contains(&Phase::Parked));
        assert!(seen.contains(&Phase::Driving));
        assert!(seen.contains(&Phase::Charging));
    }

    #[test]
    fn driving_accumulates_odometer_and_burns_charge() {
        let mut scenario = VehicleScenario::new(Uuid::new_v4(), 60.0);
        // Skip to the driving leg
        for _ in 0..CYCLE[0].ticks {
            scenario.tick();
        }
        assert_eq!(scenario.phase(), Phase::Driving);
        let odo_before = scenario.odometer_mi;
        let soc_before = scenario.soc_pct;
        for _ in 0..20 {
            scenario.tick();
        }
        assert!(scenario.odometer_mi > odo_before);
        assert!(scenario.soc_pct < soc_before);
    }

    #[test]
    fn charging_never_exceeds_the_limit() {
        let mut scenario = VehicleScenario::new(Uuid::new_v4(), 600.0);
        for _ in 0..500 {
            scenario.tick();
            assert!(scenario.soc_pct <= scenario.charge_limit_pct + 1e-9);
        }
    }

    #[test]
    fn state_document_matches_the_wire_shape() {
        let scenario = VehicleScenario::new(Uuid::new_v4(), 60.0);
        let doc = scenario.state_document();
        assert!(doc.get("timestamp").is_some());
        assert!(doc.get("battery_level_pct").is_some());
        assert!(doc.get("odometer_mi").is_some());
        assert_eq!(doc["gear_state"], "PARK");
    }
}
