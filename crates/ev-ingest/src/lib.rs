//! # EV Ingestion Layer
//!
//! Acquisition front half of the fleet telemetry core: gets vehicle state
//! out of the vehicle cloud and into the stores, no matter how unreliable
//! the connection is.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │   Subscription Channel   │   │    REST Polling (fallback)   │
//! │  (ProtocolClient, push)  │   │   (PollAcquirer, adaptive)   │
//! └──────────────────────────┘   └──────────────────────────────┘
//!               │                              │
//!               └──────────────┬───────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Coordinator                            │
//! │   (one mechanism per vehicle, dedup, poll fallback)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     IngestPipeline                           │
//! │  (persist w/ retry → state buffer → sessions → analytics)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Push is the preferred mechanism. When its circuit breaker trips or the
//! credential is rejected, the coordinator falls back to polling for the
//! affected vehicles; restoring push is an explicit operator action.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod poll;
pub mod protocol;
pub mod state_buffer;

// Re-export commonly used types
pub use backoff::ReconnectPolicy;
pub use config::Config;
pub use coordinator::{
    AcquisitionMode, Acquirer, AcquirerEvent, Coordinator, CoordinatorTask, PushAcquirer,
    PushCommand, PushWorker,
};
pub use error::{IngestError, Result};
pub use pipeline::IngestPipeline;
pub use poll::{PollAcquirer, PollConfig};
pub use protocol::{ClientEvent, ProtocolClient};
pub use state_buffer::{StateBuffer, StateChange};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
