//! Session derivation error types

use thiserror::Error;

/// Session derivation errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] ev_persistence::StorageError),

    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, SessionError>;
