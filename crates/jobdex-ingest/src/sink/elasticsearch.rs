//! Elasticsearch-compatible `_bulk` sink

use crate::config::SinkConfig;
use crate::sink::client::{parse_json, SearchClient};
use crate::sink::{endpoints, render_bulk_body, BulkAction, BulkSink, ItemError, ItemResult, SinkError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

const NDJSON: &str = "application/x-ndjson";

/// Writes chunks through `POST /_bulk`
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: SearchClient,
}

impl ElasticsearchSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        Ok(Self {
            client: SearchClient::new(config)?,
        })
    }
}

#[async_trait]
impl BulkSink for ElasticsearchSink {
    async fn submit(&mut self, actions: &[BulkAction]) -> Result<Vec<ItemResult>, SinkError> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let body = render_bulk_body(actions);
        debug!(documents = actions.len(), bytes = body.len(), "POST _bulk");

        let request = self
            .client
            .request(Method::POST, &endpoints::bulk_url(self.client.base_url()))
            .header(CONTENT_TYPE, NDJSON)
            .body(body);

        let (_, text) = self.client.send(request, &[]).await?;
        parse_bulk_response(&parse_json(&text)?, actions.len())
    }
}

/// Map a `_bulk` response onto per-action results.
///
/// Each element of `items` is a one-key object named after the operation,
/// e.g. `{"create": {"_id": "...", "status": 409, "error": {...}}}`.
pub fn parse_bulk_response(response: &Value, expected: usize) -> Result<Vec<ItemResult>, SinkError> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SinkError::malformed("bulk response has no items array"))?;

    if items.len() != expected {
        return Err(SinkError::malformed(format!(
            "bulk response has {} items for {} actions",
            items.len(),
            expected
        )));
    }

    items.iter().map(parse_item).collect()
}

fn parse_item(item: &Value) -> Result<ItemResult, SinkError> {
    let outcome = item
        .as_object()
        .and_then(|op| op.values().next())
        .ok_or_else(|| SinkError::malformed("bulk item is not an operation object"))?;

    let status = outcome
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| SinkError::malformed("bulk item has no status"))?;

    match outcome.get("error") {
        None | Some(Value::Null) if (200..300).contains(&status) => Ok(ItemResult::Ok { status }),
        error => {
            let details = error.cloned().unwrap_or(Value::Null);
            let error_type = details.get("type").and_then(Value::as_str).map(str::to_string);
            let reason = match &details {
                Value::String(text) => text.clone(),
                _ => details
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| error_type.clone())
                    .unwrap_or_else(|| format!("status {status}")),
            };
            Ok(ItemResult::Err(ItemError {
                status,
                error_type,
                reason,
                details,
            }))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mixed_response() {
        let response = json!({
            "took": 3,
            "errors": true,
            "items": [
                {"create": {"_index": "jobs-index", "_id": "a", "status": 201}},
                {"create": {"_index": "jobs-index", "_id": "b", "status": 409, "error": {
                    "type": "version_conflict_engine_exception",
                    "reason": "[b]: version conflict, document already exists (current version [1])"
                }}},
                {"create": {"_index": "jobs-index", "_id": "c", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [acct.ncpus] of type [long]"
                }}}
            ]
        });

        let results = parse_bulk_response(&response, 3).unwrap();
        assert_eq!(results[0], ItemResult::Ok { status: 201 });
        match &results[1] {
            ItemResult::Err(err) => {
                assert_eq!(err.status, 409);
                assert_eq!(err.error_type.as_deref(), Some("version_conflict_engine_exception"));
            },
            other => panic!("expected conflict, got {other:?}"),
        }
        match &results[2] {
            ItemResult::Err(err) => assert!(err.reason.contains("acct.ncpus")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_item_count_mismatch_is_malformed() {
        let response = json!({"items": [{"index": {"status": 200}}]});
        assert!(matches!(
            parse_bulk_response(&response, 2),
            Err(SinkError::MalformedResponse(_))
        ));
        assert!(parse_bulk_response(&json!({"error": "boom"}), 1).is_err());
    }

    #[test]
    fn test_error_without_reason_falls_back_to_type() {
        let item = json!({"index": {"status": 429, "error": {"type": "es_rejected_execution_exception"}}});
        match parse_item(&item).unwrap() {
            ItemResult::Err(err) => assert_eq!(err.reason, "es_rejected_execution_exception"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
