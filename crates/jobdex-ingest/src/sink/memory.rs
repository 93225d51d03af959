//! In-memory bulk sink
//!
//! Follows the same write rules as a search index: `create` on an existing
//! id is a 409 version conflict, `index` overwrites. Used for dry runs and
//! to exercise the pipeline without a cluster.

use crate::config::WriteMode;
use crate::sink::{BulkAction, BulkSink, ItemError, ItemResult, SinkError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// Documents keyed by `(index, id)`, stored as rendered JSON
#[derive(Debug, Default)]
pub struct InMemorySink {
    documents: BTreeMap<(String, String), String>,
    rejected_ids: HashSet<String>,
    requests: usize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer writes of these ids with a mapping error
    pub fn with_rejected_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of bulk requests received
    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn contains(&self, index: &str, id: &str) -> bool {
        self.documents
            .contains_key(&(index.to_string(), id.to_string()))
    }

    /// Stored document body
    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.documents
            .get(&(index.to_string(), id.to_string()))
            .and_then(|source| serde_json::from_str(source).ok())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(|(_, id)| id.as_str())
    }

    fn write(&mut self, action: &BulkAction) -> ItemResult {
        if self.rejected_ids.contains(&action.id) {
            return item_error(
                400,
                "mapper_parsing_exception",
                format!("[{}]: failed to parse document", action.id),
            );
        }

        let key = (action.index.clone(), action.id.clone());
        match action.op {
            WriteMode::Create if self.documents.contains_key(&key) => item_error(
                409,
                "version_conflict_engine_exception",
                format!(
                    "[{}]: version conflict, document already exists (current version [1])",
                    action.id
                ),
            ),
            WriteMode::Create => {
                self.documents.insert(key, action.source.clone());
                ItemResult::Ok { status: 201 }
            },
            WriteMode::Index => {
                let status = if self.documents.contains_key(&key) { 200 } else { 201 };
                self.documents.insert(key, action.source.clone());
                ItemResult::Ok { status }
            },
        }
    }
}

fn item_error(status: u16, error_type: &str, reason: String) -> ItemResult {
    ItemResult::Err(ItemError {
        status,
        error_type: Some(error_type.to_string()),
        details: json!({"type": error_type, "reason": reason}),
        reason,
    })
}

#[async_trait]
impl BulkSink for InMemorySink {
    async fn submit(&mut self, actions: &[BulkAction]) -> Result<Vec<ItemResult>, SinkError> {
        self.requests += 1;
        Ok(actions.iter().map(|action| self.write(action)).collect())
    }
}
