//! Feature modules implementing the leakvault API
//!
//! Each feature is a vertical slice with its own storage, commands and routes.
//!
//! # Features
//!
//! - **agents**: agent records and the gate every push passes through
//! - **combolists**: bulk submissions pushed by collection agents
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `repository.rs` - Storage trait with Postgres and in-memory backends
//! - `routes.rs` - HTTP route definitions

pub mod agents;
pub mod combolists;

use axum::Router;
use std::sync::Arc;

use agents::AgentGate;
use combolists::SubmissionRepository;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub gate: AgentGate,
    pub submissions: Arc<dyn SubmissionRepository>,
    /// Platform an agent must be registered for to push combolists
    pub combolist_platform: String,
}

/// Creates the API router with all feature routes mounted
///
/// - `/combolists` - Agent submissions
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/combolists", combolists::combolists_routes().with_state(state))
}
