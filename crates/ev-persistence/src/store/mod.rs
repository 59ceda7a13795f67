//! Store traits and backends

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{ChargeStore, DriveStore, HealthStore, SnapshotStore, StoreSet, VehicleStore};
