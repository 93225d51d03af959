//! Read-path query tool
//!
//! Runs one request body against the sink, times it and appends a log entry
//! `{time, kind, body, query_time_secs, result}` to the query log, so query
//! latency can be compared across index layouts.

use crate::config::IngestConfig;
use crate::error::Result;
use crate::error_log::write_pretty;
use crate::sink::{endpoints, SearchClient};
use chrono::Local;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Which endpoint a query body goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// `POST /_sql?format=json`
    Sql,
    /// `POST /<index>/_count`
    Count,
    /// `POST /<index>/_search`
    Search,
}

/// One line of the query log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
    pub time: String,
    pub kind: QueryKind,
    pub body: Value,
    pub query_time_secs: f64,
    pub result: Value,
}

/// Runs queries against one index and keeps a log
#[derive(Debug, Clone)]
pub struct QueryRunner {
    client: SearchClient,
    index: String,
    log_path: PathBuf,
}

impl QueryRunner {
    pub fn new(client: SearchClient, index: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            index: index.into(),
            log_path: log_path.into(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Ok(Self::new(
            SearchClient::new(&config.sink)?,
            &config.transform.index,
            &config.output.query_log_path,
        ))
    }

    fn url(&self, kind: QueryKind) -> String {
        let base = self.client.base_url();
        match kind {
            QueryKind::Sql => endpoints::sql_url(base),
            QueryKind::Count => endpoints::count_url(base, &self.index),
            QueryKind::Search => endpoints::search_url(base, &self.index),
        }
    }

    /// Run `body`, append the entry to the log and return it
    pub async fn run(&self, kind: QueryKind, body: Value) -> Result<QueryLogEntry> {
        let started = Instant::now();
        let result = self
            .client
            .json(Method::POST, &self.url(kind), Some(&body), &[])
            .await?;
        let elapsed = started.elapsed().as_secs_f64();

        info!(kind = ?kind, query_time_secs = elapsed, "Query finished");

        let entry = QueryLogEntry {
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            kind,
            body,
            query_time_secs: elapsed,
            result,
        };
        append_entry(&self.log_path, &entry)?;

        Ok(entry)
    }
}

/// Append one pretty-printed entry, separated from the previous one by a
/// newline
pub fn append_entry(path: &Path, entry: &QueryLogEntry) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(b"\n")?;
    write_pretty(&mut writer, entry)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read a query body given inline or as `@path`
pub fn read_body(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&text)?)
}
