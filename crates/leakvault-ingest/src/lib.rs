//! Leakvault pull-path ingestion
//!
//! Scans a local combolist file into the relational store:
//!
//! - **storage**: file registry and deduplicating entry store traits, with
//!   Postgres and in-memory backends
//! - **processor**: bounded concurrent block processor
//! - **pipeline**: `FileIngestor`, which registers a file and drives the
//!   processor over it
//! - **progress**: progress snapshots and the console bar
//! - **config**: YAML database settings for the operator tool
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use leakvault_ingest::pipeline::{FileIngestor, IngestRequest};
//! use leakvault_ingest::processor::BlockConfig;
//! use leakvault_ingest::storage::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let ingestor = FileIngestor::new(store.clone(), store, BlockConfig::default());
//!     let summary = ingestor
//!         .ingest(&IngestRequest::new("combo.txt"), &CancellationToken::new())
//!         .await?;
//!     println!("stored {} entries", summary.report.stored);
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod storage;

pub use pipeline::{FileIngestor, IngestFailure, IngestRequest, IngestSummary};
pub use processor::{BlockConfig, BlockFailure, BlockProcessor};
pub use progress::{BlockReport, ProgressSink};
pub use storage::{EntryStore, FileRegistry, MemoryStore, PgStore};
