//! Failure artifact
//!
//! Every document that ends in `Failed` is appended to an [`ErrorLog`]
//! during the run. [`ErrorSink`] writes the whole list once at the end,
//! as an indented JSON array, including runs that were cancelled or
//! stopped by a fatal error.

use crate::config::WriteMode;
use crate::error::Result;
use crate::sink::{BulkAction, ItemError, RecordOrigin};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// One failed document with enough context to find and replay it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub id: Option<String>,
    pub index: String,
    pub op_type: WriteMode,
    pub source_file: String,
    pub record: u64,
    pub status: Option<u16>,
    pub error_type: Option<String>,
    pub reason: String,
    pub error: Option<Value>,
    pub document: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    /// The sink refused this document
    pub fn from_item(action: &BulkAction, error: ItemError) -> Self {
        Self {
            id: Some(action.id.clone()),
            index: action.index.clone(),
            op_type: action.op,
            source_file: action.origin.file.clone(),
            record: action.origin.record,
            status: Some(error.status),
            error_type: error.error_type,
            reason: error.reason,
            error: Some(error.details),
            document: serde_json::from_str(&action.source).ok(),
            recorded_at: Utc::now(),
        }
    }

    /// The whole request carrying this document failed
    pub fn from_request(action: &BulkAction, status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            id: Some(action.id.clone()),
            index: action.index.clone(),
            op_type: action.op,
            source_file: action.origin.file.clone(),
            record: action.origin.record,
            status,
            error_type: None,
            reason: reason.into(),
            error: None,
            document: serde_json::from_str(&action.source).ok(),
            recorded_at: Utc::now(),
        }
    }

    /// The document never reached the sink because it has no identifier
    pub fn unidentified(
        origin: &RecordOrigin,
        index: &str,
        op_type: WriteMode,
        reason: impl Into<String>,
        document: Value,
    ) -> Self {
        Self {
            id: None,
            index: index.to_string(),
            op_type,
            source_file: origin.file.clone(),
            record: origin.record,
            status: None,
            error_type: Some("missing_identifier".to_string()),
            reason: reason.into(),
            error: None,
            document: Some(document),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only list of failures for one run
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    records: Vec<FailureRecord>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.records.last().map(|r| r.reason.as_str())
    }
}

/// Persists an [`ErrorLog`] to a JSON file
#[derive(Debug, Clone)]
pub struct ErrorSink {
    path: PathBuf,
}

impl ErrorSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the log, replacing any artifact from an earlier run.
    ///
    /// The file is written next to its final location and renamed into
    /// place, so readers never see a half-written artifact.
    pub fn persist(&self, log: &ErrorLog) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let staging = self.path.with_extension("json.partial");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            write_pretty(&mut writer, log.records())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        std::fs::rename(&staging, &self.path)?;

        info!(path = %self.path.display(), failures = log.len(), "Wrote failure artifact");
        Ok(())
    }
}

/// Pretty JSON with 4-space indentation
pub fn write_pretty<W: Write, T: Serialize + ?Sized>(writer: W, value: &T) -> Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    value.serialize(&mut serializer)?;
    Ok(())
}
