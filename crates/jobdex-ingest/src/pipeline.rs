//! Lazy decode, transform and identify stage
//!
//! [`DocumentStream`] walks the discovered files one at a time and yields
//! one [`Staged`] item per record. It holds at most one open file and one
//! record in memory. A file that fails to open or decode is logged and
//! skipped; the stream only ends early on cancellation or a fatal error.

use crate::decoder::{open_records, RecordIter};
use crate::discovery::SourceFile;
use crate::error::{IngestError, Result};
use crate::error_log::FailureRecord;
use crate::identifier::DocumentIdentifier;
use crate::sink::{BulkAction, RecordOrigin};
use crate::transform::FieldTransformer;
use jobdex_common::Document;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Output of the stage for one record
#[derive(Debug)]
pub enum Staged {
    /// Ready to submit
    Ready(BulkAction),
    /// Could not be identified; goes straight to the failure artifact
    Rejected(FailureRecord),
}

/// Per-file counters kept by the producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub opened: usize,
    pub aborted: usize,
    pub records: u64,
}

struct OpenFile {
    source: SourceFile,
    records: RecordIter,
    next_record: u64,
    started: Instant,
}

/// Finite, non-restartable sequence of staged records across files
pub struct DocumentStream {
    files: std::vec::IntoIter<SourceFile>,
    current: Option<OpenFile>,
    transformer: Arc<FieldTransformer>,
    identifier: Arc<DocumentIdentifier>,
    cancel: CancellationToken,
    stats: FileStats,
}

impl DocumentStream {
    pub fn new(
        files: Vec<SourceFile>,
        transformer: Arc<FieldTransformer>,
        identifier: Arc<DocumentIdentifier>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            files: files.into_iter(),
            current: None,
            transformer,
            identifier,
            cancel,
            stats: FileStats::default(),
        }
    }

    pub fn stats(&self) -> FileStats {
        self.stats
    }

    /// Feed every item into `tx` until the stream ends, the receiver is
    /// dropped or a fatal error has been sent. Runs on a blocking thread.
    pub fn pump(mut self, tx: mpsc::Sender<Result<Staged>>) -> FileStats {
        while let Some(item) = self.next() {
            let fatal = item.is_err();
            if tx.blocking_send(item).is_err() || fatal {
                break;
            }
        }
        self.stats
    }

    /// Open the next file that can be opened, logging the ones that cannot
    fn open_next(&mut self) -> Option<()> {
        loop {
            let source = self.files.next()?;
            match open_records(&source) {
                Ok(records) => {
                    info!(file = %source.path().display(), "Ingesting file");
                    self.stats.opened += 1;
                    self.current = Some(OpenFile {
                        source,
                        records,
                        next_record: 0,
                        started: Instant::now(),
                    });
                    return Some(());
                },
                Err(err) => {
                    let err = IngestError::decode(source.path(), err);
                    error!(file = %source.path().display(), error = %err, "Skipping unreadable file");
                    self.stats.aborted += 1;
                },
            }
        }
    }

    fn stage(&self, raw: Document, source: &SourceFile, record: u64) -> Result<Staged> {
        let origin = RecordOrigin {
            file: source.name().to_string(),
            record,
        };
        let body = self.transformer.transform(raw, source);

        match self.identifier.derive(&body, source) {
            Ok(id) => {
                let document = self.transformer.finalize(body, id);
                Ok(Staged::Ready(BulkAction::new(document, origin)?))
            },
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                warn!(file = source.name(), record, error = %err, "Record has no identifier");
                Ok(Staged::Rejected(FailureRecord::unidentified(
                    &origin,
                    self.transformer.index(),
                    self.transformer.write_mode(),
                    err.to_string(),
                    body.to_json_value(),
                )))
            },
        }
    }
}

impl Iterator for DocumentStream {
    type Item = Result<Staged>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if self.current.is_none() {
                self.open_next()?;
            }
            let file = self.current.as_mut()?;

            match file.records.next() {
                Some(Ok(raw)) => {
                    let record = file.next_record;
                    file.next_record += 1;
                    self.stats.records += 1;

                    let Some(file) = self.current.take() else {
                        continue;
                    };
                    let staged = self.stage(raw, &file.source, record);
                    self.current = Some(file);
                    return Some(staged);
                },
                Some(Err(err)) => {
                    let err = IngestError::decode(file.source.path(), err);
                    error!(
                        file = %file.source.path().display(),
                        records = file.next_record,
                        error = %err,
                        "Aborting file after corrupt record stream"
                    );
                    self.stats.aborted += 1;
                    self.current = None;
                },
                None => {
                    info!(
                        file = %file.source.path().display(),
                        records = file.next_record,
                        elapsed_secs = file.started.elapsed().as_secs_f64(),
                        "Finished file"
                    );
                    self.current = None;
                },
            }
        }
    }
}
