//! Configuration management
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults (the constants below)
//! 2. an optional TOML file passed with `--config`
//! 3. `JOBDEX_*` environment variables, `__` between section and key
//!    (`JOBDEX_SINK__URL`, `JOBDEX_BULK__CHUNK_SIZE`), with `.env` loaded first

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "JOBDEX";

/// Default search sink URL.
pub const DEFAULT_SINK_URL: &str = "http://localhost:9200";

/// Default HTTP timeout for sink requests in seconds.
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 60;

/// Default target index.
pub const DEFAULT_INDEX: &str = "jobs-index";

/// Default directory scanned for source files.
pub const DEFAULT_SOURCE_ROOT: &str = "/data/documents";

/// Default source file extension.
pub const DEFAULT_SOURCE_EXTENSION: &str = "bson.gz";

/// Default number of documents per bulk request.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default upper bound on one bulk request body (100 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 100 * 1024 * 1024;

/// Default number of staged documents buffered between decode and submit.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of failures between progress signals.
pub const DEFAULT_PROGRESS_EVERY: usize = 500;

/// Default identifier source fields.
pub const DEFAULT_JOB_ID_FIELD: &str = "acct.id";
pub const DEFAULT_END_TIME_FIELD: &str = "acct.end_time";

/// Default failure artifact path.
pub const DEFAULT_ERRORS_PATH: &str = "bulk_errors.json";

/// Default path for the persisted live mapping.
pub const DEFAULT_MAPPING_PATH: &str = "mapping.json";

/// Default query log path.
pub const DEFAULT_QUERY_LOG_PATH: &str = "queries.log";

/// Default index definition files.
pub const DEFAULT_MAPPING_FILE: &str = "mapping.json";
pub const DEFAULT_SETTINGS_FILE: &str = "index_settings.json";

/// Stems of the resources known to the accounting archive.
const DEFAULT_RESOURCES: &[(&str, &str)] = &[
    ("resource_8", "chemistry"),
    ("resource_9", "industry"),
    ("resource_10", "mae"),
    ("resource_11", "physics"),
    ("resource_13", "ub-hpc"),
    ("resource_2909", "faculty"),
    ("resource_14", "alpha"),
    ("resource_15", "bravo"),
];

// ============================================================================
// Enumerations
// ============================================================================

/// Bulk operation type sent with every document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create-if-absent: an existing id is reported as a conflict.
    #[default]
    Create,
    /// Overwrite whatever is stored under the id.
    Index,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Index => "index",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" | "create-if-absent" => Ok(WriteMode::Create),
            "index" | "overwrite" => Ok(WriteMode::Index),
            other => Err(IngestError::config(format!("unknown write mode '{other}'"))),
        }
    }
}

/// Source-specific preprocessing applied before the generic rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceVariant {
    /// Job accounting records (host cores, time limit, requested memory).
    #[default]
    Accounting,
    /// No source-specific rules.
    Passthrough,
}

// ============================================================================
// Sections
// ============================================================================

/// Search sink connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SINK_URL.to_string(),
            timeout_secs: DEFAULT_SINK_TIMEOUT_SECS,
            username: None,
            password: None,
        }
    }
}

/// Where source files are found
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub root: PathBuf,
    pub extension: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }
}

/// Static description of how a record becomes an indexed document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Target index name
    pub index: String,

    pub write_mode: WriteMode,

    pub variant: SourceVariant,

    /// Dotted paths removed from every record
    pub delete_fields: Vec<String>,

    /// Dotted paths replaced by their JSON serialization
    pub flatten_fields: Vec<String>,

    /// Key names replaced by their JSON serialization at any depth
    pub flatten_keys: Vec<String>,

    /// Dotted paths whose mapping is turned into a tagged list
    pub nested_fields: Vec<String>,

    /// Filename stem to resource label
    pub resources: BTreeMap<String, String>,

    pub job_id_field: String,
    pub end_time_field: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            index: DEFAULT_INDEX.to_string(),
            write_mode: WriteMode::default(),
            variant: SourceVariant::default(),
            delete_fields: Vec::new(),
            flatten_fields: Vec::new(),
            flatten_keys: vec!["errors".to_string()],
            nested_fields: Vec::new(),
            resources: DEFAULT_RESOURCES
                .iter()
                .map(|(stem, label)| (stem.to_string(), label.to_string()))
                .collect(),
            job_id_field: DEFAULT_JOB_ID_FIELD.to_string(),
            end_time_field: DEFAULT_END_TIME_FIELD.to_string(),
        }
    }
}

/// Bulk submission tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub chunk_size: usize,
    pub max_chunk_bytes: usize,
    pub queue_capacity: usize,
    pub progress_every: usize,
    pub show_progress: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            progress_every: DEFAULT_PROGRESS_EVERY,
            show_progress: false,
        }
    }
}

/// Files combined into the index creation body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDefinitionConfig {
    pub mapping_file: PathBuf,
    pub settings_file: PathBuf,
}

impl Default for IndexDefinitionConfig {
    fn default() -> Self {
        Self {
            mapping_file: PathBuf::from(DEFAULT_MAPPING_FILE),
            settings_file: PathBuf::from(DEFAULT_SETTINGS_FILE),
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub errors_path: PathBuf,
    pub mapping_path: PathBuf,
    pub query_log_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            errors_path: PathBuf::from(DEFAULT_ERRORS_PATH),
            mapping_path: PathBuf::from(DEFAULT_MAPPING_PATH),
            query_log_path: PathBuf::from(DEFAULT_QUERY_LOG_PATH),
        }
    }
}

// ============================================================================
// Top-level Configuration
// ============================================================================

/// Full configuration of one ingest run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub sink: SinkConfig,
    pub source: SourceConfig,
    pub transform: TransformConfig,
    pub bulk: BulkConfig,
    pub index_definition: IndexDefinitionConfig,
    pub output: OutputConfig,
}

impl IngestConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: IngestConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text, without consulting the environment
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: IngestConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.sink.url.starts_with("http://") || self.sink.url.starts_with("https://")) {
            return Err(IngestError::config(format!(
                "sink url '{}' must start with http:// or https://",
                self.sink.url
            )));
        }

        if self.source.root.as_os_str().is_empty() {
            return Err(IngestError::config("source root cannot be empty"));
        }

        if self.source.extension.trim().is_empty() {
            return Err(IngestError::config("source extension cannot be empty"));
        }

        if self.transform.index.trim().is_empty() {
            return Err(IngestError::config("index name cannot be empty"));
        }

        if self.transform.resources.is_empty() {
            return Err(IngestError::config("resource table cannot be empty"));
        }

        if self.bulk.chunk_size == 0 {
            return Err(IngestError::config("bulk chunk_size must be greater than 0"));
        }

        if self.bulk.max_chunk_bytes == 0 {
            return Err(IngestError::config("bulk max_chunk_bytes must be greater than 0"));
        }

        if self.bulk.queue_capacity == 0 {
            return Err(IngestError::config("bulk queue_capacity must be greater than 0"));
        }

        if self.bulk.progress_every == 0 {
            return Err(IngestError::config("bulk progress_every must be greater than 0"));
        }

        Ok(())
    }
}
