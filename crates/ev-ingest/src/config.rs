//! # Ingestion Configuration
//!
//! Environment-based configuration for the ingestion daemon.

use std::env;
use std::time::Duration;

use uuid::Uuid;

use crate::coordinator::AcquisitionMode;

/// Ingestion daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Push (subscription channel) or poll (request-response) acquisition
    pub mode: AcquisitionMode,

    /// Vehicle-cloud subscription endpoint (ws:// or wss://)
    pub ws_url: String,

    /// Vehicle-cloud REST base URL
    pub rest_url: String,

    /// Opaque session credential sent in the init frame / bearer header
    pub access_token: String,

    /// Vehicles to track
    pub vehicle_ids: Vec<Uuid>,

    /// Poll interval while the vehicle is awake (Ready/Go/Charging)
    pub poll_awake_interval: Duration,

    /// Poll interval while the vehicle is asleep (Sleep/Standby)
    pub poll_asleep_interval: Duration,

    /// Reconnect backoff base delay
    pub reconnect_base: Duration,

    /// Reconnect backoff cap
    pub reconnect_max: Duration,

    /// Consecutive failures before a subscription is abandoned
    pub max_consecutive_errors: u32,

    /// Handshake acknowledgment timeout
    pub handshake_timeout: Duration,

    /// No inbound traffic for this long means a dead connection
    pub keepalive_idle: Duration,

    /// Per-poll HTTP timeout
    pub http_timeout: Duration,

    /// Gap without snapshots after which an open drive is considered ended
    pub idle_drive_timeout: Duration,

    /// Startup reconciliation grace window for stale active sessions
    pub reconcile_grace: Duration,

    /// Minimum SoC delta (percentage points) for capacity calibration
    pub min_calibration_soc_delta_pct: f64,

    /// Minimum charge duration for capacity calibration
    pub min_calibration_duration: Duration,

    /// At most one health snapshot per vehicle per this interval
    pub health_cadence: Duration,

    /// Logging level when RUST_LOG is unset
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            mode: match env::var("EV_ACQUISITION_MODE").as_deref() {
                Ok("poll") => AcquisitionMode::Poll,
                _ => AcquisitionMode::Push,
            },

            ws_url: env::var("EV_CLOUD_WS_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8090/stream".to_string()),

            rest_url: env::var("EV_CLOUD_REST_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),

            access_token: env::var("EV_CLOUD_ACCESS_TOKEN").unwrap_or_default(),

            vehicle_ids: env::var("EV_VEHICLE_IDS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect(),

            poll_awake_interval: secs_var("EV_POLL_AWAKE_SECS", 30),
            poll_asleep_interval: secs_var("EV_POLL_ASLEEP_SECS", 600),
            reconnect_base: secs_var("EV_RECONNECT_BASE_SECS", 5),
            reconnect_max: secs_var("EV_RECONNECT_MAX_SECS", 300),

            max_consecutive_errors: env::var("EV_MAX_CONSECUTIVE_ERRORS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            handshake_timeout: secs_var("EV_HANDSHAKE_TIMEOUT_SECS", 10),
            keepalive_idle: secs_var("EV_KEEPALIVE_IDLE_SECS", 60),
            http_timeout: secs_var("EV_HTTP_TIMEOUT_SECS", 30),
            idle_drive_timeout: secs_var("EV_IDLE_DRIVE_TIMEOUT_SECS", 600),
            reconcile_grace: secs_var("EV_RECONCILE_GRACE_SECS", 1800),

            min_calibration_soc_delta_pct: env::var("EV_MIN_CALIBRATION_SOC_DELTA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15.0),

            min_calibration_duration: secs_var("EV_MIN_CALIBRATION_DURATION_SECS", 1200),
            health_cadence: secs_var("EV_HEALTH_CADENCE_SECS", 86_400),

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn secs_var(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = Config::from_env();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_base, Duration::from_secs(5));
        assert_eq!(config.reconnect_max, Duration::from_secs(300));
    }
}
