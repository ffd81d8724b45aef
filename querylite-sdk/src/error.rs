//! Error types for the SDK

use querylite::{FetchError, QueryError};
use thiserror::Error;

/// SDK error type
#[derive(Error, Debug)]
pub enum Error {
    /// Error raised by the cache itself (fetch failure, cancellation, ...)
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Cached data did not match the requested type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The fetch or mutation failure behind this error, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Error::Query(err) => err.fetch_error(),
            Error::Serialization(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Query(err) if err.is_cancelled())
    }
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Encode a typed fetch result into the cache's value representation
pub(crate) fn encode<R: serde::Serialize>(value: R) -> std::result::Result<serde_json::Value, FetchError> {
    serde_json::to_value(value)
        .map_err(|e| FetchError::new(format!("Failed to encode result: {}", e)).with_code("encode"))
}
