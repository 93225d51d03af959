//! Error types shared across the jobdex crates

use thiserror::Error;

/// Result type alias for jobdex operations
pub type Result<T> = std::result::Result<T, JobdexError>;

/// Errors raised by the shared document layer
#[derive(Error, Debug)]
pub enum JobdexError {
    /// A document could not be rendered as JSON text
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
