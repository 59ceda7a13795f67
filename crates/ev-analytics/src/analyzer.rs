//! Battery health analyzer.
//!
//! Consumes accepted capacity readings on a throttled cadence and appends
//! [`BatteryHealthSnapshot`] facts. Trend fields are computed at creation
//! time from the prior history and never mutated afterwards.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::capacity::{original_capacity_kwh, CapacityReading, ReadingSource};
use crate::error::{AnalyticsError, Result};
use crate::regression;
use ev_domain::BatteryHealthSnapshot;
use ev_persistence::{HealthStore, VehicleStore};

/// Analyzer tunables
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Minimum calibration confidence for a charge-session reading to be
    /// accepted
    pub min_calibration_confidence: f64,

    /// At most one health snapshot per vehicle per this interval
    pub cadence: Duration,

    /// Minimum history points (including the new one) before trend fields
    /// are reported
    pub min_trend_points: usize,

    /// Trailing window used for the degradation regression
    pub regression_window: usize,

    /// Health percentage treated as the warranty floor
    pub warranty_floor_pct: f64,

    /// Odometer mark for the projected-health field, in miles
    pub projection_odometer_mi: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_calibration_confidence: 0.3,
            cadence: Duration::hours(24),
            min_trend_points: 5,
            regression_window: 12,
            warranty_floor_pct: 70.0,
            projection_odometer_mi: 100_000.0,
        }
    }
}

/// Converts capacity readings into health snapshots and trend projections.
pub struct BatteryHealthAnalyzer {
    health: Arc<dyn HealthStore>,
    vehicles: Arc<dyn VehicleStore>,
    config: AnalyzerConfig,
}

impl BatteryHealthAnalyzer {
    #[must_use]
    pub fn new(
        health: Arc<dyn HealthStore>,
        vehicles: Arc<dyn VehicleStore>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            health,
            vehicles,
            config,
        }
    }

    /// Offer one capacity reading.
    ///
    /// Returns the appended health snapshot, or `None` when the reading was
    /// rejected (low confidence) or throttled by the cadence.
    pub async fn ingest_reading(
        &self,
        reading: &CapacityReading,
    ) -> Result<Option<BatteryHealthSnapshot>> {
        if let ReadingSource::Calibrated { confidence } = reading.source {
            if confidence < self.config.min_calibration_confidence {
                tracing::debug!(
                    vehicle_id = %reading.vehicle_id,
                    confidence,
                    "Rejecting low-confidence calibrated capacity reading"
                );
                return Ok(None);
            }
        }

        // Cadence throttle: earliest reading wins within a window
        if let Some(latest) = self.health.get_latest(reading.vehicle_id).await? {
            if reading.recorded_at - latest.recorded_at < self.config.cadence {
                return Ok(None);
            }
        }

        let vehicle = self
            .vehicles
            .get_by_id(reading.vehicle_id)
            .await?
            .ok_or(AnalyticsError::UnknownVehicle(reading.vehicle_id))?;
        let original = original_capacity_kwh(vehicle.pack, vehicle.model_year);

        let health_pct = reading.capacity_kwh / original * 100.0;
        let history = self.health.history(reading.vehicle_id).await?;

        let mut snapshot = BatteryHealthSnapshot {
            id: Uuid::new_v4(),
            vehicle_id: reading.vehicle_id,
            recorded_at: reading.recorded_at,
            odometer_mi: reading.odometer_mi,
            reported_capacity_kwh: reading.capacity_kwh,
            original_capacity_kwh: original,
            health_pct,
            degradation_pct: 100.0 - health_pct,
            degradation_rate_pct_per_10k_mi: None,
            projected_health_at_100k_pct: None,
            projected_miles_to_warranty_floor: None,
        };
        self.apply_trend(&mut snapshot, &history);

        self.health.append(&snapshot).await?;
        tracing::info!(
            vehicle_id = %reading.vehicle_id,
            health_pct = format_args!("{health_pct:.1}"),
            odometer_mi = reading.odometer_mi,
            "Recorded battery health snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Trend fields from a regression of health against odometer over the
    /// trailing window. Degenerate regressions (insufficient points, flat or
    /// improving slope) leave the projections `None`.
    fn apply_trend(&self, snapshot: &mut BatteryHealthSnapshot, history: &[BatteryHealthSnapshot]) {
        let mut points: Vec<(f64, f64)> = history
            .iter()
            .map(|h| (h.odometer_mi, h.health_pct))
            .collect();
        points.push((snapshot.odometer_mi, snapshot.health_pct));

        if points.len() < self.config.min_trend_points {
            return;
        }
        let window_start = points.len().saturating_sub(self.config.regression_window);
        let Some(fit) = regression::fit(&points[window_start..]) else {
            return;
        };
        if fit.slope >= 0.0 {
            return;
        }

        snapshot.degradation_rate_pct_per_10k_mi = Some(-fit.slope * 10_000.0);
        snapshot.projected_health_at_100k_pct =
            Some(fit.predict(self.config.projection_odometer_mi));
        snapshot.projected_miles_to_warranty_floor =
            fit.solve_for(self.config.warranty_floor_pct);
    }
}
