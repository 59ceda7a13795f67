//! # EV Persistence Library
//!
//! Storage layer for the EV fleet telemetry core. The core never talks to a
//! concrete database: every collaborator goes through the store traits, and
//! the in-memory backend defines the reference semantics a durable backend
//! must match.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Ingestion Pipeline / Session Engine                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Store Traits                            │
//! │  (SnapshotStore, DriveStore, ChargeStore, HealthStore,       │
//! │   VehicleStore)                                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │     MemoryStore (reference) / durable backend of choice      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes from the ingestion pipeline go through [`WriteRetryPolicy`] so a
//! flaky backend degrades to data gaps, never to a crashed stream.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod retry;
pub mod store;

// Re-export commonly used types
pub use error::{Result, StorageError};
pub use retry::WriteRetryPolicy;
pub use store::memory::MemoryStore;
pub use store::traits::{
    ChargeStore, DriveStore, HealthStore, SnapshotStore, StoreSet, VehicleStore,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
