//! # EV Session Derivation
//!
//! Turns the unified per-vehicle snapshot stream into discrete domain
//! events: driving sessions and charging sessions. Two independent state
//! machines per vehicle consume snapshots in arrival order; the
//! [`SessionEngine`] owns the machines and every session write.
//!
//! Guarantees:
//!
//! - Sessions for one vehicle never overlap; malformed sequences force-close
//!   the prior open session before a new one opens.
//! - Out-of-order snapshots are dropped, not reordered.
//! - Replaying an identical ordered sequence into a fresh engine yields
//!   identical session aggregates.
//! - Sessions left open by a prior run are resumed or force-closed by
//!   startup reconciliation.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod charge;
pub mod config;
pub mod drive;
pub mod engine;
pub mod error;

pub use charge::{ChargeMachine, ChargeOutcome};
pub use config::SessionConfig;
pub use drive::{DriveMachine, DriveOutcome};
pub use engine::{SessionEngine, TickOutput};
pub use error::{Result, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
