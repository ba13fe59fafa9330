//! Error types for Wacast

use thiserror::Error;

/// Main error type for Wacast
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation {
        code: &'static str,
        field: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Wacast
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Validation error without a field attribution
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            code,
            field: None,
            message: message.into(),
        }
    }

    /// Validation error attributed to a request field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            code: "invalid_field",
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Conflict error with a machine code
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Error::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::NotFound(_) => 404,
            Error::Conflict { .. } => 409,
            Error::InvalidTransition { .. } => 409,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Configuration(_) => 503,
            Error::ExternalService(_) => 502,
            Error::Timeout(_) => 504,
            Error::Network(_) => 502,
            Error::Database(_) => 500,
            Error::Storage(_) => 500,
            Error::Cancelled => 503,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error kind string
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Configuration(_) => "configuration",
            Error::ExternalService(_) => "external_service",
            Error::Timeout(_) => "timeout",
            Error::Network(_) => "network",
            Error::Database(_) => "database",
            Error::Storage(_) => "storage",
            Error::Cancelled => "cancelled",
            Error::Internal(_) => "internal",
            Error::Other(_) => "internal",
        }
    }

    /// Returns the most specific machine code available
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { code, .. } => code,
            Error::Conflict { code, .. } => code,
            other => other.kind(),
        }
    }

    /// Field name for validation errors
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}
