//! Error types for the ninsho server.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Listener or runtime failure.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// Route store or route validation error.
    #[error(transparent)]
    Core(#[from] ninsho_core::CoreError),

    /// Caddy synchronization error.
    #[error(transparent)]
    Sync(#[from] ninsho_caddy::SyncError),

    /// Health subsystem setup error.
    #[error(transparent)]
    Health(#[from] ninsho_health::HealthError),

    /// Relay setup error.
    #[error(transparent)]
    Relay(#[from] ninsho_relay::RelayError),

    /// Telemetry initialization error.
    #[error(transparent)]
    Telemetry(#[from] ninsho_telemetry::TelemetryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Core(e) => e.status_code(),
            Self::Sync(e) => e.status_code(),
            Self::Relay(e) => e.status_code().as_u16(),
            Self::Config { .. }
            | Self::Server { .. }
            | Self::Health(_)
            | Self::Telemetry(_)
            | Self::Io(_) => 500,
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Server { .. } => "server",
            Self::Core(e) => e.category(),
            Self::Sync(e) => e.category(),
            Self::Health(_) => "health",
            Self::Relay(e) => e.category(),
            Self::Telemetry(_) => "telemetry",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// JSON error body for internal endpoints.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl From<&ServerError> for ErrorResponse {
    fn from(err: &ServerError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_through() {
        let err = ServerError::from(ninsho_core::CoreError::not_found("abc"));
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.category(), "not_found");
        assert_eq!(err.to_string(), "Route not found: abc");
    }

    #[test]
    fn test_error_response_from_error() {
        let err = ServerError::config("listen_port out of range");
        let body = ErrorResponse::from(&err);
        assert_eq!(body.error, "config");
        assert!(body.message.contains("listen_port"));
        assert_eq!(err.status_code(), 500);
    }
}
