//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bson::{doc, Document};
use flate2::write::GzEncoder;
use flate2::Compression;
use jobdex_ingest::IngestConfig;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One accounting record as the scheduler exports it
pub fn job(job_id: &str, end_time: i64) -> Document {
    doc! {
        "_id": bson::oid::ObjectId::new(),
        "acct": {
            "id": job_id,
            "end_time": end_time,
            "ncpus": 16_i32,
            "timelimit": "01:00:00",
            "reqmem": "4000Mc",
            "hostcores": [["cpn-k01", 8_i32], ["cpn-k02", "error"]],
        },
        "cpu": {
            "user": 0.75,
            "load": f64::NAN,
            "errors": {"cpn-k02": "no data"},
        },
    }
}

/// Encode `records` as back-to-back BSON documents
pub fn encode(records: &[Document]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        record.to_writer(&mut out).unwrap();
    }
    out
}

/// Write a gzip-compressed BSON archive
pub fn write_archive(dir: &Path, name: &str, records: &[Document]) -> PathBuf {
    write_gzip(dir, name, &encode(records))
}

/// Write arbitrary bytes through gzip
pub fn write_gzip(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap();
    path
}

/// Source directory plus a scratch directory for artifacts
pub struct Workspace {
    pub source: TempDir,
    pub output: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            source: TempDir::new().unwrap(),
            output: TempDir::new().unwrap(),
        }
    }

    pub fn errors_path(&self) -> PathBuf {
        self.output.path().join("bulk_errors.json")
    }

    /// Default configuration pointed at this workspace
    pub fn config(&self) -> IngestConfig {
        let mut config = IngestConfig::default();
        config.source.root = self.source.path().to_path_buf();
        config.output.errors_path = self.errors_path();
        config.output.mapping_path = self.output.path().join("mapping.json");
        config.output.query_log_path = self.output.path().join("queries.log");
        config.bulk.chunk_size = 2;
        config
    }

    /// Parsed failure artifact
    pub fn failures(&self) -> Vec<serde_json::Value> {
        let text = std::fs::read_to_string(self.errors_path()).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}
