//! # EV Battery Analytics
//!
//! Battery-health analysis for the fleet telemetry core: accepts capacity
//! readings (API-reported usable capacity or calibrated charge sessions),
//! converts them into health snapshots against the pack's original
//! capacity, and projects the degradation trend along a least-squares fit.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod analyzer;
pub mod capacity;
pub mod error;
pub mod regression;

pub use analyzer::{AnalyzerConfig, BatteryHealthAnalyzer};
pub use capacity::{original_capacity_kwh, CapacityReading, ReadingSource};
pub use error::{AnalyticsError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
