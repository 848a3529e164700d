//! Error types for Parley services.

use thiserror::Error;

/// Unified error type for Parley services.
///
/// Crate-local errors (memory, upstream, chat turns) convert into this type at the
/// HTTP boundary, where [`Error::status_code`] and [`Error::code`] pick the response.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upstream service is temporarily unable to serve the request
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// External service error
    #[error("External service error: {0}")]
    External(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Unavailable(_) => 503,
            Self::External(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::External(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message for API error bodies, without the variant prefix.
    ///
    /// Internal failures collapse to a generic text; details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::InvalidInput(msg)
            | Self::Unavailable(msg)
            | Self::External(msg) => msg.clone(),
            Self::Internal(_) => "Internal error".to_string(),
        }
    }
}
