//! Leakvault Ingest - scan a combolist file into the store

use anyhow::{Context, Result};
use clap::Parser;
use leakvault_common::logging::{init_logging, LogConfig, LogLevel};
use leakvault_common::IngestError;
use leakvault_ingest::config::{IngestConfig, DEFAULT_CONFIG_PATH};
use leakvault_ingest::pipeline::{FileIngestor, IngestRequest};
use leakvault_ingest::processor::{BlockConfig, DEFAULT_BLOCK_SIZE, DEFAULT_WORKERS};
use leakvault_ingest::progress::{format_bytes, summary_line, ConsoleProgress, LogProgress};
use leakvault_ingest::storage::{EntryStore, FileRegistry, MemoryStore, PgStore};
use leakvault_ingest::ProgressSink;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "leakvault-ingest")]
#[command(author, version, about = "Scan a combolist file into the leakvault store")]
struct Cli {
    /// Path to the combolist file
    #[arg(short, long)]
    file: PathBuf,

    /// Free-text description stored with the file
    #[arg(short, long, default_value = "not informed")]
    description: String,

    /// Where the dump came from
    #[arg(short, long, default_value = "not informed")]
    source: String,

    /// Maximum lines per batch
    #[arg(long, env = "LEAKVAULT_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Batches processed concurrently
    #[arg(long, env = "LEAKVAULT_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// YAML file with database settings
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Apply pending migrations before scanning
    #[arg(long)]
    migrate: bool,

    /// Run against an in-memory store; nothing is persisted
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("leakvault-ingest")
        .filter_directives("sqlx=warn")
        .build()
        // LOG_* variables take precedence over these defaults
        .apply_env()?;
    let _log_guard = init_logging(&log_config)?;

    let block_config = BlockConfig {
        block_size: cli.block_size,
        workers: cli.workers,
    };
    block_config.validate()?;

    let (registry, entries): (Arc<dyn FileRegistry>, Arc<dyn EntryStore>) = if cli.dry_run {
        warn!("Dry run: entries are kept in memory and discarded on exit");
        let store = Arc::new(MemoryStore::new());
        (store.clone(), store)
    } else {
        let config = IngestConfig::load(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?;
        let pool = config.connect().await?;
        info!(max_connections = config.database.max_connections, "Database pool ready");

        if cli.migrate {
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Migrations applied");
        }

        let store = Arc::new(PgStore::new(pool));
        (store.clone(), store)
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing running batches");
            ctrl_c_token.cancel();
        }
    });

    let request = IngestRequest::new(&cli.file)
        .with_description(&cli.description)
        .with_source(&cli.source);
    if let Ok(metadata) = std::fs::metadata(&cli.file) {
        info!(
            file = %cli.file.display(),
            size = %format_bytes(metadata.len()),
            source = %cli.source,
            description = %cli.description,
            block_size = cli.block_size,
            workers = cli.workers,
            "Starting scan"
        );
    }

    // The bar is drawn on stderr; redirected runs get one log line per batch
    let progress: Arc<dyn ProgressSink> = if std::io::stderr().is_terminal() {
        Arc::new(ConsoleProgress::new())
    } else {
        Arc::new(LogProgress)
    };
    let ingestor = FileIngestor::with_progress(registry, entries, block_config, progress);

    match ingestor.ingest(&request, &cancel).await {
        Ok(summary) => {
            info!(
                file_id = summary.file_id,
                fingerprint = %summary.fingerprint,
                duplicates = summary.report.duplicates,
                malformed = summary.report.malformed,
                rejected = summary.report.rejected,
                "{}",
                summary_line(&summary.report)
            );
            Ok(())
        },
        Err(failure) => {
            if let IngestError::AlreadyExists(ref fingerprint) = failure.source {
                error!(%fingerprint, "File was already processed");
            } else {
                error!(
                    file_id = ?failure.file_id,
                    error = %failure.source,
                    "{}",
                    summary_line(&failure.report)
                );
            }
            Err(failure.into())
        },
    }
}
