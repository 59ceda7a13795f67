//! Pack capacity reference data and capacity-reading acceptance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ev_domain::PackType;

/// One accepted candidate capacity observation for a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityReading {
    pub vehicle_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub odometer_mi: f64,
    pub capacity_kwh: f64,
    pub source: ReadingSource,
}

/// Where a capacity reading came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum ReadingSource {
    /// Usable capacity reported directly by the vehicle-cloud API
    Reported,
    /// Derived from a charge session meeting the calibration thresholds
    Calibrated { confidence: f64 },
}

/// Static original (as-new) usable capacity lookup by pack type and model
/// year, in kWh.
#[must_use]
pub fn original_capacity_kwh(pack: PackType, model_year: i32) -> f64 {
    match (pack, model_year) {
        (PackType::StandardRange, ..=2020) => 54.0,
        (PackType::StandardRange, 2021..) => 57.5,
        (PackType::LongRange, ..=2020) => 75.0,
        (PackType::LongRange, 2021..) => 78.1,
        (PackType::Performance, ..=2020) => 76.0,
        (PackType::Performance, 2021..) => 78.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_varies_by_pack_and_year() {
        assert!(
            original_capacity_kwh(PackType::LongRange, 2022)
                > original_capacity_kwh(PackType::StandardRange, 2022)
        );
        assert!(
            original_capacity_kwh(PackType::StandardRange, 2022)
                > original_capacity_kwh(PackType::StandardRange, 2019)
        );
    }
}
