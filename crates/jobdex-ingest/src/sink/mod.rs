//! Bulk write targets
//!
//! A [`BulkSink`] takes a chunk of [`BulkAction`]s and reports one
//! [`ItemResult`] per action, in order. Two implementations exist:
//!
//! - [`ElasticsearchSink`] speaks the NDJSON `_bulk` protocol over HTTP
//! - [`InMemorySink`] keeps documents in a map with the same conflict rules
//!
//! A request-level failure is a [`SinkError`]: a transport error means the
//! sink is gone and the run stops; a rejected or unreadable response fails
//! just that chunk.

pub mod client;
pub mod elasticsearch;
pub mod endpoints;
pub mod memory;

pub use client::SearchClient;
pub use elasticsearch::ElasticsearchSink;
pub use memory::InMemorySink;

use crate::config::WriteMode;
use crate::transform::TransformedDocument;
use async_trait::async_trait;
use jobdex_common::JobdexError;
use serde::Serialize;
use thiserror::Error;

/// Request-level sink failure
#[derive(Error, Debug)]
pub enum SinkError {
    /// Connection, TLS or timeout failure
    #[error("Failed to reach search sink: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sink answered the whole request with an error status
    #[error("Search sink rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response could not be matched to the submitted actions
    #[error("Unexpected response from search sink: {0}")]
    MalformedResponse(String),
}

impl SinkError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Only a lost connection stops the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Transport(_))
    }
}

/// Where a staged document came from, for the failure artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOrigin {
    pub file: String,
    pub record: u64,
}

/// One document ready to send, body already rendered as JSON
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub op: WriteMode,
    pub index: String,
    pub id: String,
    pub source: String,
    pub origin: RecordOrigin,
}

impl BulkAction {
    pub fn new(document: TransformedDocument, origin: RecordOrigin) -> Result<Self, JobdexError> {
        Ok(Self {
            source: document.body.to_json_string()?,
            op: document.write_mode,
            index: document.index,
            id: document.id,
            origin,
        })
    }

    /// NDJSON action line, e.g. `{"create":{"_index":"jobs-index","_id":"..."}}`
    pub fn action_line(&self) -> String {
        serde_json::json!({
            self.op.as_str(): {"_index": self.index, "_id": self.id}
        })
        .to_string()
    }

    /// Approximate size on the wire, used to bound chunk bytes
    pub fn encoded_len(&self) -> usize {
        // action line framing plus two newlines
        self.source.len() + self.index.len() + self.id.len() + 40
    }
}

/// Per-document failure reported by the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub status: u16,
    pub error_type: Option<String>,
    pub reason: String,
    /// Raw error object as returned by the sink
    pub details: serde_json::Value,
}

/// Per-document outcome reported by the sink
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Ok { status: u16 },
    Err(ItemError),
}

#[async_trait]
pub trait BulkSink: Send {
    /// Write `actions` and return one result per action, in the same order.
    async fn submit(&mut self, actions: &[BulkAction]) -> Result<Vec<ItemResult>, SinkError>;
}

/// Render `actions` as an NDJSON `_bulk` body
pub fn render_bulk_body(actions: &[BulkAction]) -> String {
    let capacity = actions.iter().map(BulkAction::encoded_len).sum();
    let mut body = String::with_capacity(capacity);
    for action in actions {
        body.push_str(&action.action_line());
        body.push('\n');
        body.push_str(&action.source);
        body.push('\n');
    }
    body
}
