//! Error types for Caddy synchronization.

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Errors raised while building or pushing the route document.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The admin API could not be reached.
    #[error("Caddy admin {method} failed: {source}")]
    Request {
        /// HTTP method of the failed call.
        method: Method,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The admin API answered with a non-2xx status.
    #[error("Caddy admin {method} rejected with {status}: {body}")]
    Rejected {
        /// HTTP method of the rejected call.
        method: Method,
        /// Status returned by Caddy.
        status: StatusCode,
        /// Start of the response body.
        body: String,
    },

    /// The document could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The connectivity tester could not be constructed.
    #[error("Health error: {0}")]
    Health(#[from] ninsho_health::HealthError),

    /// Invalid synthesizer configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl SyncError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the edge proxy answered at all.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// HTTP status code for reporting this error to a management caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Request { source, .. } if source.is_timeout() => 504,
            Self::Request { .. } | Self::Rejected { .. } => 502,
            Self::Json(_) | Self::Client(_) | Self::Health(_) | Self::Config { .. } => 500,
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Request { .. } => "unreachable",
            Self::Rejected { .. } => "rejected",
            Self::Json(_) => "serialization",
            Self::Client(_) | Self::Health(_) => "client",
            Self::Config { .. } => "config",
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
