//! Error types for the route model.

use thiserror::Error;

/// Errors raised at the route boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A route field failed validation.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Another route already owns this mount path.
    #[error("Route with path '{path}' already exists")]
    DuplicatePath {
        /// The conflicting mount path.
        path: String,
    },

    /// No route with the given ID exists.
    #[error("Route not found: {id}")]
    NotFound {
        /// The route ID that was looked up.
        id: String,
    },

    /// I/O error while reading a routes file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while decoding a routes file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a validation error for a field.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Get the HTTP status code an admin surface should answer with.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::DuplicatePath { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Io(_) => 500,
            Self::Json(_) => 500,
        }
    }

    /// Get the error category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::DuplicatePath { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Result type for route operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = CoreError::validation("path", "Path cannot be empty");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
        assert_eq!(err.to_string(), "Invalid path: Path cannot be empty");

        let err = CoreError::not_found("abc");
        assert_eq!(err.status_code(), 404);

        let err = CoreError::DuplicatePath {
            path: "/x".to_string(),
        };
        assert_eq!(err.status_code(), 409);
        assert!(err.to_string().contains("'/x'"));
    }
}
