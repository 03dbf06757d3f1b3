//! Error types for the relay.
//!
//! Every error maps to a status code and a short public message. The
//! underlying cause is only ever logged.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Closed classification of an upstream transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    /// Connect or read timed out.
    Timeout,
    /// Connection refused, reset or aborted.
    Unavailable,
    /// Anything else.
    Other,
}

impl TransportFailure {
    /// Classify a client error by walking its source chain.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }

        let mut source: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = source {
            if let Some(io) = e.downcast_ref::<io::Error>() {
                match Self::from_io_kind(io.kind()) {
                    Self::Other => {}
                    failure => return failure,
                }
            }
            source = e.source();
        }

        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other
        }
    }

    /// Classify an I/O error kind.
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable => Self::Unavailable,
            _ => Self::Other,
        }
    }

    /// Status code returned downstream.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Other => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream request failed before response headers arrived.
    #[error("upstream request failed ({failure}): {source}")]
    Upstream {
        /// Classified failure.
        failure: TransportFailure,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// No response headers arrived within the route timeout.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The route is disabled and must not receive traffic.
    #[error("route {path} is disabled")]
    RouteDisabled {
        /// Mount path.
        path: String,
    },

    /// The upstream client could not be built.
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    /// Invalid relay configuration.
    #[error("invalid relay configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Wrap an upstream client error, classifying it.
    pub fn upstream(source: reqwest::Error) -> Self {
        Self::Upstream {
            failure: TransportFailure::from_reqwest(&source),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Status code returned downstream.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { failure, .. } => failure.status_code(),
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::RouteDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Client(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body returned downstream. Never includes the cause.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Upstream {
                failure: TransportFailure::Timeout,
                ..
            }
            | Self::Timeout(_) => "Service timeout",
            Self::Upstream {
                failure: TransportFailure::Unavailable,
                ..
            } => "Service unavailable",
            Self::RouteDisabled { .. } => "Route is disabled",
            Self::Upstream { .. } | Self::Client(_) | Self::Config(_) => "Proxy error",
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Upstream { failure, .. } => failure.as_str(),
            Self::Timeout(_) => "timeout",
            Self::RouteDisabled { .. } => "disabled",
            Self::Client(_) => "client",
            Self::Config(_) => "config",
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kind_classification() {
        assert_eq!(
            TransportFailure::from_io_kind(io::ErrorKind::TimedOut),
            TransportFailure::Timeout
        );
        assert_eq!(
            TransportFailure::from_io_kind(io::ErrorKind::ConnectionRefused),
            TransportFailure::Unavailable
        );
        assert_eq!(
            TransportFailure::from_io_kind(io::ErrorKind::ConnectionReset),
            TransportFailure::Unavailable
        );
        assert_eq!(
            TransportFailure::from_io_kind(io::ErrorKind::InvalidData),
            TransportFailure::Other
        );
    }

    #[test]
    fn test_failure_status_codes() {
        assert_eq!(TransportFailure::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(TransportFailure::Unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(TransportFailure::Other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_header_timeout_error() {
        let err = RelayError::Timeout(Duration::from_secs(30));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.public_message(), "Service timeout");
    }

    #[test]
    fn test_disabled_route_error() {
        let err = RelayError::RouteDisabled {
            path: "/media".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.public_message(), "Route is disabled");
        assert_eq!(err.category(), "disabled");
    }

    #[test]
    fn test_config_error_is_generic() {
        let err = RelayError::config("via token contains a newline");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Proxy error");
        assert!(err.to_string().contains("newline"));
    }
}
