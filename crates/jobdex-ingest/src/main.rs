//! Jobdex Ingest - job accounting ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobdex_common::logging::{init_logging, LogConfig, LogLevel};
use jobdex_ingest::{
    query, BulkIngestor, ElasticsearchSink, IndexAdmin, IndexDefinition, IngestConfig, QueryKind,
    QueryRunner, WriteMode,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "jobdex-ingest")]
#[command(author, version, about = "Bulk ingest of job accounting archives into a search index")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "JOBDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every source file under the source root
    Ingest {
        /// Override the source root
        #[arg(long)]
        root: Option<PathBuf>,

        /// Override the write mode
        #[arg(long, value_enum)]
        mode: Option<WriteMode>,

        /// Override the failure artifact path
        #[arg(long)]
        errors: Option<PathBuf>,

        /// Save the live mapping after the run
        #[arg(long)]
        save_mapping: bool,

        /// Show a progress spinner
        #[arg(long)]
        progress: bool,
    },

    /// Delete and recreate the index from the mapping and settings files
    Prepare,

    /// Save the live index mapping
    Mapping {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a timed query and append it to the query log
    Query {
        /// Endpoint to send the body to
        #[arg(short, long, value_enum, default_value = "sql")]
        kind: QueryKind,

        /// JSON request body, or @file
        #[arg(short, long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("jobdex-ingest")
        .filter_directives("reqwest=warn,hyper=warn,hyper_util=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Ingest {
            root,
            mode,
            errors,
            save_mapping,
            progress,
        } => {
            if let Some(root) = root {
                config.source.root = root;
            }
            if let Some(mode) = mode {
                config.transform.write_mode = mode;
            }
            if let Some(errors) = errors {
                config.output.errors_path = errors;
            }
            config.bulk.show_progress |= progress;
            config.validate()?;

            ingest(&config, save_mapping).await?;
        },
        Command::Prepare => {
            let definition = IndexDefinition::load(&config.index_definition)?;
            IndexAdmin::from_config(&config)?.prepare(&definition).await?;
        },
        Command::Mapping { output } => {
            let path = output.unwrap_or_else(|| config.output.mapping_path.clone());
            IndexAdmin::from_config(&config)?.save_mapping(&path).await?;
        },
        Command::Query { kind, body } => {
            let body = query::read_body(&body).context("Failed to read query body")?;
            let entry = QueryRunner::from_config(&config)?.run(kind, body).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        },
    }

    Ok(())
}

async fn ingest(config: &IngestConfig, save_mapping: bool) -> Result<()> {
    let ingestor = BulkIngestor::new(config)?;
    let mut sink = ElasticsearchSink::new(&config.sink)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing staged documents");
                cancel.cancel();
            }
        }
    });

    let report = ingestor.run(&mut sink, cancel).await?;

    info!(
        acknowledged = report.acknowledged,
        duplicates = report.duplicates,
        failed = report.failed,
        errors = %report.errors_path.display(),
        "Ingestion complete in {:.2} minutes",
        report.duration_minutes()
    );

    if save_mapping && !report.cancelled {
        IndexAdmin::from_config(config)?
            .save_mapping(&config.output.mapping_path)
            .await?;
    }

    Ok(())
}
