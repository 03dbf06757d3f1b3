//! Error types for the health subsystem.
//!
//! Probe failures are never errors; they are classifications. These variants
//! cover setup and route store failures only.

use thiserror::Error;

/// Health subsystem errors.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The route store rejected a read or status write.
    #[error("Route store error: {0}")]
    Store(#[from] ninsho_core::CoreError),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
