//! Jobdex Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams job accounting archives into a search index.
//!
//! # Pipeline
//!
//! - **Discovery** ([`discovery`]): recursive scan for `*.bson.gz` files
//! - **Decoding** ([`decoder`]): lazy gzip + BSON record stream per file
//! - **Transform** ([`transform`]): ordered normalization rules per record
//! - **Identity** ([`identifier`]): `<resource>-<job id>-<end time>` ids
//! - **Submission** ([`ingestor`], [`sink`]): chunked bulk writes with
//!   per-document classification and a failure artifact ([`error_log`])
//!
//! Index preparation lives in [`admin`] and the read-path timing tool in
//! [`query`].
//!
//! # Example
//!
//! ```no_run
//! use jobdex_ingest::{BulkIngestor, ElasticsearchSink, IngestConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     let mut sink = ElasticsearchSink::new(&config.sink)?;
//!     let report = BulkIngestor::new(&config)?
//!         .run(&mut sink, CancellationToken::new())
//!         .await?;
//!     println!("{} failed", report.failed);
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod error_log;
pub mod identifier;
pub mod ingestor;
pub mod pipeline;
pub mod query;
pub mod sink;
pub mod transform;

// Re-export commonly used types
pub use admin::{IndexAdmin, IndexDefinition};
pub use config::{IngestConfig, SourceVariant, TransformConfig, WriteMode};
pub use error::{IngestError, Result};
pub use error_log::{ErrorLog, ErrorSink, FailureRecord};
pub use identifier::DocumentIdentifier;
pub use ingestor::{classify, BulkIngestor, IngestOutcome, IngestReport, ProgressSignal};
pub use query::{QueryKind, QueryRunner};
pub use sink::{BulkSink, ElasticsearchSink, InMemorySink};
pub use transform::{FieldTransformer, TransformedDocument};
