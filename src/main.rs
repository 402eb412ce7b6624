//! Command-line interface for mongo-es-sync
//!
//! # Usage Examples
//!
//! ## Full Export
//! ```bash
//! mongo-es-sync \
//!   --mongo-uri mongodb://localhost:27017 \
//!   --database shop --collection orders \
//!   --denylist password,ssn
//! ```
//!
//! ## Incremental Export
//! ```bash
//! # Resume after the newest `updated_at` already in the index
//! mongo-es-sync \
//!   --database shop --collection orders \
//!   --watermark-field updated_at
//!
//! # Integer sequence field against an Elasticsearch 7+ cluster
//! mongo-es-sync \
//!   --database shop --collection orders \
//!   --watermark-field seq --watermark-kind number \
//!   --no-mapping-types
//! ```
//!
//! Every flag can also be set through the environment variable listed in
//! `--help` (MONGO_HOST, ES_HOST, WATERMARK_FIELD, ...).

use anyhow::Context;
use clap::Parser;
use es_sink::ElasticsearchSink;
use mongo_es_sync::{ElasticsearchArgs, ExportOpts, MongoOpts};
use mongo_es_sync_mongodb_source::{MongoSource, SourceOpts, SyncDriver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongo-es-sync")]
#[command(about = "Export a MongoDB collection into an Elasticsearch index")]
#[command(long_about = None)]
struct Cli {
    /// MongoDB source options
    #[command(flatten)]
    mongo: MongoOpts,

    /// Elasticsearch target options
    #[command(flatten)]
    elasticsearch: ElasticsearchArgs,

    /// Export options
    #[command(flatten)]
    export: ExportOpts,

    /// Log progress at info level
    #[arg(short, long)]
    verbose: bool,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over the verbosity flags
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.export.to_sync_config(&cli.mongo);
    let sink = ElasticsearchSink::new((&cli.elasticsearch).into())
        .context("Failed to configure Elasticsearch sink")?;
    let source = MongoSource::connect(&SourceOpts::from(&cli.mongo))
        .await
        .context("Failed to connect to MongoDB")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Received interrupt signal (Ctrl+C), stopping export");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to install Ctrl+C handler: {e}"),
        }
    });

    let result = SyncDriver::new(&source, &sink, config)
        .run_until_cancelled(&cancel)
        .await;
    source.shutdown().await;

    let summary = result.with_context(|| {
        format!(
            "Export of {}.{} failed",
            cli.mongo.database, cli.mongo.collection
        )
    })?;

    if let Some(resume_point) = &summary.resume_point {
        tracing::info!("Resumed after watermark {resume_point}");
    }
    if let (Some(id), Some(doc)) = (&summary.first_document_id, &summary.first_document) {
        tracing::debug!(
            "First document {id}: {}",
            serde_json::to_string(doc).context("Failed to serialize first document")?
        );
    }
    if summary.dry_run {
        tracing::info!(
            "Dry run complete: {} documents would be written to {}",
            summary.documents_processed,
            summary.index
        );
    } else {
        tracing::info!(
            "Exported {} documents to {}",
            summary.documents_processed,
            summary.index
        );
    }

    Ok(())
}
