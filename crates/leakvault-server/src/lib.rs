//! Leakvault Server Library
//!
//! Push-path ingestion for leaked-credential collection agents.
//!
//! # Overview
//!
//! Agents deliver data over two channels, both guarded by the same
//! [`features::agents::AgentGate`]:
//!
//! - **Bulk submissions**: `POST /api/v1/combolists/bulk` carries one
//!   submission (metadata plus records) identified by a caller-supplied hash.
//!   Resubmitting a hash reuses its metadata and never duplicates records.
//! - **Agent stream**: a TCP listener reading newline-delimited JSON frames.
//!   `file` frames register a file, `entrie` frames add entries to it.
//!
//! An agent presenting a key registered for another platform is marked
//! `compromised` and refused from then on.
//!
//! # Architecture
//!
//! - **api**: router assembly, response envelopes and the health check
//! - **features**: vertical slices (`agents`, `combolists`), each with a
//!   repository trait, Postgres and in-memory backends, commands and routes
//! - **stream**: the agent stream listener with bounded per-connection
//!   queues and worker pools
//! - **config**: environment configuration
//! - **middleware**: CORS and request tracing
//!
//! File and entry storage is shared with the pull path through the
//! `leakvault-ingest` storage traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use leakvault_server::api::{create_router, AppState};
//! use leakvault_server::config::Config;
//! use leakvault_server::features::agents::{AgentGate, PgAgentRepository};
//! use leakvault_server::features::combolists::PgSubmissionRepository;
//! use leakvault_server::features::FeatureState;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!     let state = AppState {
//!         features: FeatureState {
//!             gate: AgentGate::new(Arc::new(PgAgentRepository::new(pool.clone()))),
//!             submissions: Arc::new(PgSubmissionRepository::new(pool.clone())),
//!             combolist_platform: config.agents.combolist_platform.clone(),
//!         },
//!         health: Arc::new(pool),
//!     };
//!     let app = create_router(state, &config.cors);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod middleware;
pub mod stream;

// Re-export commonly used types
pub use error::AppError;
