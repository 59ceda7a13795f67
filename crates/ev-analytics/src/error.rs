//! Analytics error types

use thiserror::Error;

/// Battery-health analyzer errors
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Storage error: {0}")]
    Storage(#[from] ev_persistence::StorageError),

    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(uuid::Uuid),

    #[error("No original capacity known for pack {pack:?} model year {model_year}")]
    UnknownPack {
        pack: ev_domain::PackType,
        model_year: i32,
    },
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
