//! Streaming bulk ingestion
//!
//! [`BulkIngestor::run`] wires the stages together:
//!
//! ```text
//! discover -> validate stems -> [blocking thread] decode/transform/identify
//!          -> bounded channel -> chunk -> BulkSink::submit -> classify
//! ```
//!
//! Decoding the next records overlaps with the in-flight bulk request, and
//! the channel bounds how far the producer can run ahead. Every outcome is
//! classified; failures are collected and written once at the end, whether
//! the run completed, was cancelled or stopped on a fatal error.

use crate::config::{BulkConfig, IngestConfig, WriteMode};
use crate::discovery::{discover_files, SourceFile};
use crate::error::{IngestError, Result};
use crate::error_log::{ErrorLog, ErrorSink, FailureRecord};
use crate::identifier::DocumentIdentifier;
use crate::pipeline::{DocumentStream, FileStats, Staged};
use crate::sink::{BulkAction, BulkSink, ItemResult, SinkError};
use crate::transform::FieldTransformer;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error type the sink reports for an id that already exists.
const VERSION_CONFLICT_TYPE: &str = "version_conflict_engine_exception";

/// Classified result of one submitted document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Acknowledged,
    DuplicateIgnored,
    Failed(String),
}

/// Classify one item result under the mode it was submitted with.
///
/// An identity conflict is only benign in create mode, where it means the
/// document was ingested by an earlier run.
pub fn classify(mode: WriteMode, result: &ItemResult) -> IngestOutcome {
    match result {
        ItemResult::Ok { .. } => IngestOutcome::Acknowledged,
        ItemResult::Err(err) => {
            let conflict = err.status == 409
                || err.error_type.as_deref() == Some(VERSION_CONFLICT_TYPE)
                || err.reason.contains("version conflict");
            if conflict && mode == WriteMode::Create {
                IngestOutcome::DuplicateIgnored
            } else {
                IngestOutcome::Failed(err.reason.clone())
            }
        },
    }
}

/// Raised every `progress_every` failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSignal {
    pub failures: u64,
    pub last_reason: String,
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub files_total: usize,
    pub files_opened: usize,
    pub files_aborted: usize,
    pub records: u64,
    pub staged: u64,
    pub acknowledged: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub cancelled: bool,
    pub progress_signals: u64,
    pub last_signal: Option<ProgressSignal>,
    pub errors_path: PathBuf,
    pub duration_secs: f64,
}

impl IngestReport {
    pub fn duration_minutes(&self) -> f64 {
        self.duration_secs / 60.0
    }
}

/// Counters and failures of one run, owned by the consumer
pub struct PipelineContext {
    staged: u64,
    acknowledged: u64,
    duplicates: u64,
    failed: u64,
    errors: ErrorLog,
    progress_every: u64,
    signals: u64,
    last_signal: Option<ProgressSignal>,
    progress: ProgressBar,
}

impl PipelineContext {
    pub fn new(progress_every: usize, progress: ProgressBar) -> Self {
        Self {
            staged: 0,
            acknowledged: 0,
            duplicates: 0,
            failed: 0,
            errors: ErrorLog::new(),
            progress_every: progress_every.max(1) as u64,
            signals: 0,
            last_signal: None,
            progress,
        }
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    fn record_staged(&mut self) {
        self.staged += 1;
    }

    fn record_result(&mut self, action: &BulkAction, result: ItemResult) {
        match classify(action.op, &result) {
            IngestOutcome::Acknowledged => self.acknowledged += 1,
            IngestOutcome::DuplicateIgnored => self.duplicates += 1,
            IngestOutcome::Failed(_) => {
                if let ItemResult::Err(err) = result {
                    self.record_failure(FailureRecord::from_item(action, err));
                }
            },
        }
    }

    /// Append a failure; every `progress_every` failures emit a signal
    /// carrying the latest reason.
    fn record_failure(&mut self, failure: FailureRecord) {
        self.failed += 1;
        self.errors.push(failure);

        if self.failed % self.progress_every == 0 {
            let signal = ProgressSignal {
                failures: self.failed,
                last_reason: self.errors.last_reason().unwrap_or_default().to_string(),
            };
            warn!(
                failures = signal.failures,
                last_reason = %signal.last_reason,
                "Bulk failures accumulating"
            );
            self.signals += 1;
            self.last_signal = Some(signal);
        }
    }

    pub fn last_signal(&self) -> Option<&ProgressSignal> {
        self.last_signal.as_ref()
    }

    fn refresh_progress(&self) {
        self.progress.set_message(format!(
            "{} submitted, {} duplicates, {} failed",
            self.acknowledged, self.duplicates, self.failed
        ));
    }
}

/// Runs one ingest from the configured source tree into a [`BulkSink`]
#[derive(Debug, Clone)]
pub struct BulkIngestor {
    root: PathBuf,
    extension: String,
    bulk: BulkConfig,
    transformer: Arc<FieldTransformer>,
    identifier: Arc<DocumentIdentifier>,
    error_sink: ErrorSink,
}

impl BulkIngestor {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        Ok(Self {
            root: config.source.root.clone(),
            extension: config.source.extension.clone(),
            bulk: config.bulk.clone(),
            transformer: Arc::new(FieldTransformer::new(&config.transform)?),
            identifier: Arc::new(DocumentIdentifier::new(&config.transform)),
            error_sink: ErrorSink::new(&config.output.errors_path),
        })
    }

    /// Discover source files and check that every stem has a resource label
    pub fn plan(&self) -> Result<Vec<SourceFile>> {
        let files = discover_files(&self.root, &self.extension)?;
        self.identifier.resources().validate(&files)?;
        Ok(files)
    }

    /// Ingest every discovered file into `sink`.
    ///
    /// Cancelling `cancel` stops decoding; staged documents are still
    /// submitted and the failure artifact is written before returning.
    /// A run that fails planning writes an empty artifact.
    pub async fn run<S: BulkSink>(&self, sink: &mut S, cancel: CancellationToken) -> Result<IngestReport> {
        let started = Instant::now();
        let files = match self.plan() {
            Ok(files) => files,
            Err(err) => {
                self.persist_or_log(&ErrorLog::new());
                return Err(err);
            },
        };
        let files_total = files.len();

        info!(
            root = %self.root.display(),
            files = files_total,
            index = self.transformer.index(),
            mode = %self.transformer.write_mode(),
            "Starting bulk ingest"
        );

        let stream = DocumentStream::new(
            files,
            Arc::clone(&self.transformer),
            Arc::clone(&self.identifier),
            cancel.clone(),
        );
        let (tx, rx) = mpsc::channel(self.bulk.queue_capacity);
        let producer = tokio::task::spawn_blocking(move || stream.pump(tx));

        let mut ctx = PipelineContext::new(self.bulk.progress_every, self.progress_bar());
        let outcome = self.consume(sink, rx, &cancel, &mut ctx).await;
        let file_stats = producer.await;

        ctx.progress.finish_and_clear();
        if let Err(err) = outcome {
            self.persist_or_log(ctx.errors());
            return Err(err);
        }
        self.error_sink.persist(ctx.errors())?;
        let file_stats: FileStats = file_stats?;

        let report = IngestReport {
            files_total,
            files_opened: file_stats.opened,
            files_aborted: file_stats.aborted,
            records: file_stats.records,
            staged: ctx.staged,
            acknowledged: ctx.acknowledged,
            duplicates: ctx.duplicates,
            failed: ctx.failed,
            cancelled: cancel.is_cancelled(),
            progress_signals: ctx.signals,
            last_signal: ctx.last_signal.clone(),
            errors_path: self.error_sink.path().to_path_buf(),
            duration_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            files = report.files_opened,
            aborted_files = report.files_aborted,
            acknowledged = report.acknowledged,
            duplicates = report.duplicates,
            failed = report.failed,
            cancelled = report.cancelled,
            minutes = report.duration_minutes(),
            "Bulk ingest finished"
        );

        Ok(report)
    }

    /// Pull staged items, submit them in bounded chunks and classify results
    async fn consume<S: BulkSink>(
        &self,
        sink: &mut S,
        mut rx: mpsc::Receiver<Result<Staged>>,
        cancel: &CancellationToken,
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        let mut chunk: Vec<BulkAction> = Vec::with_capacity(self.bulk.chunk_size);
        let mut chunk_bytes = 0usize;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(pending = chunk.len(), "Ingest cancelled, draining staged documents");
                    break;
                }
                item = rx.recv() => item,
            };

            let Some(item) = item else { break };

            match item {
                Ok(Staged::Ready(action)) => {
                    let len = action.encoded_len();
                    if !chunk.is_empty() && chunk_bytes + len > self.bulk.max_chunk_bytes {
                        self.flush(sink, &mut chunk, ctx).await?;
                        chunk_bytes = 0;
                    }

                    ctx.record_staged();
                    chunk_bytes += len;
                    chunk.push(action);

                    if chunk.len() >= self.bulk.chunk_size {
                        self.flush(sink, &mut chunk, ctx).await?;
                        chunk_bytes = 0;
                    }
                },
                Ok(Staged::Rejected(failure)) => ctx.record_failure(failure),
                Err(err) => {
                    // Submit what is already staged before stopping
                    self.flush(sink, &mut chunk, ctx).await?;
                    return Err(err);
                },
            }
        }

        self.flush(sink, &mut chunk, ctx).await
    }

    async fn flush<S: BulkSink>(
        &self,
        sink: &mut S,
        chunk: &mut Vec<BulkAction>,
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let actions = std::mem::take(chunk);
        debug!(documents = actions.len(), "Submitting bulk chunk");

        match sink.submit(&actions).await {
            Ok(results) => {
                for (action, result) in actions.iter().zip(results) {
                    ctx.record_result(action, result);
                }
            },
            Err(err) => {
                let status = match &err {
                    SinkError::Rejected { status, .. } => Some(*status),
                    _ => None,
                };
                let reason = err.to_string();
                for action in &actions {
                    ctx.record_failure(FailureRecord::from_request(action, status, reason.clone()));
                }
                if err.is_fatal() {
                    return Err(IngestError::Sink(err));
                }
                warn!(documents = actions.len(), error = %reason, "Bulk request failed, chunk recorded as failed");
            },
        }

        ctx.refresh_progress();
        Ok(())
    }

    /// Write the artifact on a path that is already returning an error
    fn persist_or_log(&self, log: &ErrorLog) {
        if let Err(err) = self.error_sink.persist(log) {
            error!(path = %self.error_sink.path().display(), error = %err, "Failed to write failure artifact");
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.bulk.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner());
        bar.enable_steady_tick(Duration::from_millis(200));
        bar
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::{InMemorySink, ItemError, RecordOrigin};
    use serde_json::Value;

    fn action(id: &str) -> BulkAction {
        BulkAction {
            op: WriteMode::Create,
            index: "jobs-index".to_string(),
            id: id.to_string(),
            source: "{}".to_string(),
            origin: RecordOrigin {
                file: "resource_10.bson.gz".to_string(),
                record: 0,
            },
        }
    }

    fn item_error(status: u16, error_type: &str, reason: &str) -> ItemResult {
        ItemResult::Err(ItemError {
            status,
            error_type: Some(error_type.to_string()),
            reason: reason.to_string(),
            details: Value::Null,
        })
    }

    #[test]
    fn test_classify() {
        let conflict = item_error(409, VERSION_CONFLICT_TYPE, "[x]: version conflict, document already exists");
        let mapping = item_error(400, "mapper_parsing_exception", "failed to parse");

        assert_eq!(
            classify(WriteMode::Create, &ItemResult::Ok { status: 201 }),
            IngestOutcome::Acknowledged
        );
        assert_eq!(classify(WriteMode::Create, &conflict), IngestOutcome::DuplicateIgnored);
        assert_eq!(
            classify(WriteMode::Index, &conflict),
            IngestOutcome::Failed("[x]: version conflict, document already exists".to_string())
        );
        assert_eq!(
            classify(WriteMode::Create, &mapping),
            IngestOutcome::Failed("failed to parse".to_string())
        );
    }

    #[test]
    fn test_conflict_detected_by_reason_alone() {
        let result = item_error(500, "unknown", "version conflict on shard");
        assert_eq!(classify(WriteMode::Create, &result), IngestOutcome::DuplicateIgnored);
    }

    #[test]
    fn test_context_counts() {
        let mut ctx = PipelineContext::new(2, ProgressBar::hidden());
        let action = action("mae-1-2");

        ctx.record_result(&action, ItemResult::Ok { status: 201 });
        ctx.record_result(&action, item_error(409, VERSION_CONFLICT_TYPE, "version conflict"));
        ctx.record_result(&action, item_error(400, "mapper_parsing_exception", "bad"));
        ctx.record_result(&action, item_error(429, "es_rejected_execution_exception", "busy"));

        assert_eq!(ctx.acknowledged, 1);
        assert_eq!(ctx.duplicates, 1);
        assert_eq!(ctx.failed(), 2);
        assert_eq!(ctx.errors().last_reason(), Some("busy"));
        assert_eq!(ctx.signals, 1);
        assert_eq!(
            ctx.last_signal(),
            Some(&ProgressSignal {
                failures: 2,
                last_reason: "busy".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_submits_staged_chunk() {
        let mut config = IngestConfig::default();
        config.bulk.chunk_size = 10;
        let ingestor = BulkIngestor::new(&config).unwrap();
        let mut sink = InMemorySink::new();
        let mut ctx = PipelineContext::new(1, ProgressBar::hidden());
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Staged::Ready(action("mae-1-2")))).await.unwrap();
        tx.send(Ok(Staged::Ready(action("mae-2-3")))).await.unwrap();

        // cancel once both actions sit in the partial chunk, with the channel still open
        let canceller = async {
            while tx.capacity() < tx.max_capacity() {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        let (outcome, ()) = tokio::join!(ingestor.consume(&mut sink, rx, &cancel, &mut ctx), canceller);

        outcome.unwrap();
        assert_eq!(sink.requests(), 1);
        assert_eq!(sink.len(), 2);
        assert_eq!(ctx.staged, 2);
        assert_eq!(ctx.acknowledged, 2);
        drop(tx);
    }
}
