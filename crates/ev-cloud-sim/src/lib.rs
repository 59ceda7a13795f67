//! # EV Cloud Simulator
//!
//! Stand-in for the vehicle-cloud API during development and integration
//! testing. Serves scripted fleet scenarios over the same two surfaces the
//! real cloud exposes:
//!
//! - `GET /api/1/vehicles/{id}/state` for request-response polling
//! - `GET /stream` for the bidirectional subscription channel
//!
//! Vehicles follow a repeating park / drive / park / charge cycle with
//! noisy telemetry, compressed in time so full sessions appear within
//! minutes of wall clock.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod scenario;
pub mod server;

pub use scenario::{Phase, VehicleScenario};
pub use server::{router, SimState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
