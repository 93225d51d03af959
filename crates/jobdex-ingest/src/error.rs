//! Error types for the ingest pipeline
//!
//! Only a few errors stop a run: configuration problems, an unreadable
//! source tree, an unknown resource stem and a lost connection to the sink.
//! Everything that concerns a single file or document is reported through
//! logs and the failure artifact instead.

use crate::decoder::DecodeError;
use crate::identifier::IdentifierError;
use crate::sink::SinkError;
use jobdex_common::JobdexError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while preparing or running an ingest
#[derive(Error, Debug)]
pub enum IngestError {
    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Walking the source tree failed
    #[error("Failed to read source tree: {0}")]
    Discovery(#[from] walkdir::Error),

    /// One source file could not be decoded past some record
    #[error("Failed to decode '{}': {source}", file.display())]
    Decode {
        file: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// Identifier derivation failed
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check the config file or JOBDEX_* environment variables.")]
    Config(String),

    /// Configuration sources could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Talking to the search sink failed
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// JSON encoding or decoding failed
    #[error("Failed to process JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid regular expression in a coercion rule
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Shared document error
    #[error(transparent)]
    Common(#[from] JobdexError),

    /// The decode thread panicked or was cancelled
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error for one file
    pub fn decode(file: impl Into<PathBuf>, source: DecodeError) -> Self {
        Self::Decode {
            file: file.into(),
            source,
        }
    }

    /// Whether this error must stop the whole run.
    ///
    /// Decode errors and per-document identifier gaps are scoped to one file
    /// or one record; a sink that rejected a request leaves the connection
    /// usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Decode { .. } => false,
            IngestError::Identifier(err) => err.is_fatal(),
            IngestError::Sink(err) => err.is_fatal(),
            _ => true,
        }
    }
}
