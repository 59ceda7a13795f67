//! Session derivation configuration

use chrono::Duration;

/// Tunables for the drive/charge state machines and startup reconciliation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gap without snapshots after which an open drive is considered ended
    pub idle_drive_timeout: Duration,

    /// Window after startup within which a stale active session may still be
    /// resumed by an incoming snapshot before being force-closed
    pub reconcile_grace: Duration,

    /// Minimum SoC gain for a charge session to calibrate pack capacity
    pub min_calibration_soc_delta_pct: f64,

    /// Minimum duration for a charge session to calibrate pack capacity
    pub min_calibration_duration: Duration,

    /// Pack capacity assumed until the API reports a usable capacity
    pub default_pack_capacity_kwh: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_drive_timeout: Duration::minutes(10),
            reconcile_grace: Duration::minutes(30),
            min_calibration_soc_delta_pct: 15.0,
            min_calibration_duration: Duration::minutes(20),
            default_pack_capacity_kwh: 75.0,
        }
    }
}
