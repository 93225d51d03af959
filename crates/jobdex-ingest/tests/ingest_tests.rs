//! End-to-end ingest tests against the in-memory sink
//!
//! These tests cover:
//! - Idempotent re-ingestion in create mode
//! - Overwrite mode
//! - Per-file isolation of corrupt archives
//! - Per-document identifier failures
//! - Fatal configuration errors
//! - Periodic failure signals
//! - Cancellation

mod common;

use async_trait::async_trait;
use common::{job, write_archive, write_gzip, Workspace};
use jobdex_ingest::sink::{BulkAction, ItemResult, SinkError};
use jobdex_ingest::{BulkIngestor, BulkSink, InMemorySink, IngestError, ProgressSignal, WriteMode};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Cancels the run once its first chunk has been written
struct CancelAfterFirstChunk {
    inner: InMemorySink,
    cancel: CancellationToken,
}

#[async_trait]
impl BulkSink for CancelAfterFirstChunk {
    async fn submit(&mut self, actions: &[BulkAction]) -> Result<Vec<ItemResult>, SinkError> {
        let results = self.inner.submit(actions).await;
        self.cancel.cancel();
        results
    }
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_reingest_in_create_mode_is_idempotent() {
    let ws = Workspace::new();
    write_archive(
        ws.source.path(),
        "resource_8.bson.gz",
        &[job("100", 1_600_000_000), job("101", 1_600_000_100), job("102", 1_600_000_200)],
    );
    write_archive(ws.source.path(), "resource_11.bson.gz", &[job("100", 1_600_000_000)]);

    let ingestor = BulkIngestor::new(&ws.config()).unwrap();
    let mut sink = InMemorySink::new();

    let first = ingestor.run(&mut sink, CancellationToken::new()).await.unwrap();
    assert_eq!(first.files_opened, 2);
    assert_eq!(first.acknowledged, 4);
    assert_eq!(first.failed, 0);
    assert_eq!(sink.len(), 4);

    let second = ingestor.run(&mut sink, CancellationToken::new()).await.unwrap();
    assert_eq!(second.acknowledged, 0);
    assert_eq!(second.duplicates, 4);
    assert_eq!(second.failed, 0);
    assert!(ws.failures().is_empty());

    // one live document per identifier
    assert_eq!(sink.len(), 4);
    let mut ids: Vec<_> = sink.ids().collect();
    ids.sort_unstable();
    assert_eq!(
        ids,
        vec![
            "chemistry-100-1600000000",
            "chemistry-101-1600000100",
            "chemistry-102-1600000200",
            "physics-100-1600000000",
        ]
    );
}

#[tokio::test]
async fn test_ingested_document_is_normalized() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_13.bson.gz", &[job("7", 42)]);

    let mut sink = InMemorySink::new();
    BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    let stored = sink.get("jobs-index", "ub-hpc-7-42").unwrap();
    assert!(stored["id"].is_string());
    assert!(stored.get("_id").is_none());
    assert_eq!(stored["resource_id"], 13);
    assert_eq!(stored["acct"]["timelimit"], 3600);
    assert_eq!(stored["acct"]["reqmem"], json!({"megabytes": 4000, "type": "c"}));
    assert_eq!(
        stored["acct"]["hostcores"],
        json!([
            {"hostname": "cpn-k01", "value": 8},
            {"hostname": "cpn-k02", "value": -1}
        ])
    );
    assert!(stored["cpu"].get("load").is_none());
    assert_eq!(stored["cpu"]["errors"], r#"{"cpn-k02":"no data"}"#);
}

#[tokio::test]
async fn test_index_mode_overwrites() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_9.bson.gz", &[job("1", 10), job("2", 20)]);

    let mut config = ws.config();
    config.transform.write_mode = WriteMode::Index;
    let ingestor = BulkIngestor::new(&config).unwrap();
    let mut sink = InMemorySink::new();

    ingestor.run(&mut sink, CancellationToken::new()).await.unwrap();
    let second = ingestor.run(&mut sink, CancellationToken::new()).await.unwrap();

    assert_eq!(second.acknowledged, 2);
    assert_eq!(second.duplicates, 0);
    assert_eq!(sink.len(), 2);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_corrupt_archive_only_aborts_that_file() {
    let ws = Workspace::new();
    let mut bytes = common::encode(&[job("1", 10), job("2", 20)]);
    bytes.truncate(bytes.len() - 7);
    write_gzip(ws.source.path(), "resource_10.bson.gz", &bytes);
    write_archive(ws.source.path(), "resource_8.bson.gz", &[job("3", 30)]);

    let mut sink = InMemorySink::new();
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files_aborted, 1);
    assert_eq!(report.acknowledged, 2);
    assert!(sink.contains("jobs-index", "mae-1-10"));
    assert!(!sink.contains("jobs-index", "mae-2-20"));
    assert!(sink.contains("jobs-index", "chemistry-3-30"));
}

#[tokio::test]
async fn test_missing_identifier_field_is_recorded_and_run_continues() {
    let ws = Workspace::new();
    let mut incomplete = job("5", 50);
    incomplete.get_document_mut("acct").unwrap().remove("end_time");
    write_archive(
        ws.source.path(),
        "resource_14.bson.gz",
        &[job("4", 40), incomplete, job("6", 60)],
    );

    let mut sink = InMemorySink::new();
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.failed, 1);

    let failures = ws.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["id"], serde_json::Value::Null);
    assert_eq!(failures[0]["record"], 1);
    assert_eq!(failures[0]["source_file"], "resource_14.bson.gz");
    assert!(failures[0]["reason"].as_str().unwrap().contains("acct.end_time"));
}

#[tokio::test]
async fn test_sink_rejections_go_to_artifact() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_15.bson.gz", &[job("1", 1), job("2", 2)]);

    let mut sink = InMemorySink::new().with_rejected_ids(["bravo-2-2"]);
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let failures = ws.failures();
    assert_eq!(failures[0]["id"], "bravo-2-2");
    assert_eq!(failures[0]["status"], 400);
    assert_eq!(failures[0]["error_type"], "mapper_parsing_exception");
}

#[tokio::test]
async fn test_unknown_resource_stops_before_submitting() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_8.bson.gz", &[job("1", 1)]);
    write_archive(ws.source.path(), "resource_999.bson.gz", &[job("2", 2)]);
    std::fs::write(ws.errors_path(), r#"[{"id":"stale"}]"#).unwrap();

    let mut sink = InMemorySink::new();
    let err = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Identifier(_)));
    assert!(err.is_fatal());
    assert_eq!(sink.requests(), 0);
    assert!(ws.failures().is_empty());
}

#[tokio::test]
async fn test_other_extensions_are_not_ingested() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_8.bson.gz", &[job("1", 1)]);
    write_archive(ws.source.path(), "RESOURCE_999.BSON.GZ", &[job("2", 2)]);
    write_archive(ws.source.path(), "resource_999xbson.gz", &[job("3", 3)]);

    let mut sink = InMemorySink::new();
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files_total, 1);
    assert_eq!(report.acknowledged, 1);
    assert!(sink.contains("jobs-index", "chemistry-1-1"));
}

#[tokio::test]
async fn test_failures_raise_periodic_signal() {
    let ws = Workspace::new();
    write_archive(
        ws.source.path(),
        "resource_8.bson.gz",
        &[job("1", 1), job("2", 2), job("3", 3), job("4", 4), job("5", 5)],
    );

    let mut config = ws.config();
    config.bulk.progress_every = 2;
    let mut sink = InMemorySink::new().with_rejected_ids([
        "chemistry-1-1",
        "chemistry-2-2",
        "chemistry-4-4",
        "chemistry-5-5",
    ]);
    let report = BulkIngestor::new(&config)
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 4);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.progress_signals, 2);
    assert_eq!(
        report.last_signal,
        Some(ProgressSignal {
            failures: 4,
            last_reason: "[chemistry-5-5]: failed to parse document".to_string(),
        })
    );
}

#[tokio::test]
async fn test_failures_below_interval_raise_no_signal() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_8.bson.gz", &[job("1", 1), job("2", 2)]);

    let mut config = ws.config();
    config.bulk.progress_every = 2;
    let mut sink = InMemorySink::new().with_rejected_ids(["chemistry-2-2"]);
    let report = BulkIngestor::new(&config)
        .unwrap()
        .run(&mut sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.progress_signals, 0);
    assert_eq!(report.last_signal, None);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_run_still_writes_artifact() {
    let ws = Workspace::new();
    write_archive(ws.source.path(), "resource_8.bson.gz", &[job("1", 1), job("2", 2)]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut sink = InMemorySink::new();
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.staged, 0);
    assert!(sink.is_empty());
    assert!(ws.errors_path().exists());
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_submitted_results() {
    let ws = Workspace::new();
    write_archive(
        ws.source.path(),
        "resource_8.bson.gz",
        &[job("1", 1), job("2", 2), job("3", 3), job("4", 4), job("5", 5), job("6", 6)],
    );

    let cancel = CancellationToken::new();
    let mut sink = CancelAfterFirstChunk {
        inner: InMemorySink::new().with_rejected_ids(["chemistry-2-2"]),
        cancel: cancel.clone(),
    };
    let report = BulkIngestor::new(&ws.config())
        .unwrap()
        .run(&mut sink, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(sink.inner.requests(), 1);
    assert_eq!(report.staged, 2);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.failed, 1);
    assert!(sink.inner.contains("jobs-index", "chemistry-1-1"));

    let failures = ws.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["id"], "chemistry-2-2");
}
