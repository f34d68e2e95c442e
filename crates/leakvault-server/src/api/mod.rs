//! HTTP surface: router assembly and the health check

pub mod response;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::config::CorsConfig;
use crate::error::AppError;
use crate::features::{self, FeatureState};
use crate::middleware;

/// Liveness of the backing store
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), AppError>;
}

#[async_trait]
impl HealthCheck for PgPool {
    async fn check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(self).await?;
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub features: FeatureState,
    pub health: Arc<dyn HealthCheck>,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let feature_routes = features::router(state.features.clone());

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    if let Err(e) = state.health.check().await {
        tracing::error!(error = %e, "Database health check failed");
        return Err(AppError::Unavailable("database unreachable".to_string()));
    }

    Ok(Json(json!({
        "status": "healthy",
        "database": "connected"
    })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::features::agents::{AgentGate, MemoryAgentRepository};
    use crate::features::combolists::MemorySubmissionRepository;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Probe(bool);

    #[async_trait]
    impl HealthCheck for Probe {
        async fn check(&self) -> Result<(), AppError> {
            if self.0 {
                Ok(())
            } else {
                Err(AppError::Internal("connection refused".to_string()))
            }
        }
    }

    fn app(healthy: bool) -> Router {
        let state = AppState {
            features: FeatureState {
                gate: AgentGate::new(Arc::new(MemoryAgentRepository::new())),
                submissions: Arc::new(MemorySubmissionRepository::new()),
                combolist_platform: "combolist".to_string(),
            },
            health: Arc::new(Probe(healthy)),
        };
        create_router(
            state,
            &CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allow_credentials: false,
            },
        )
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_ok() {
        assert_eq!(get_status(app(true), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_unavailable_store() {
        assert_eq!(
            get_status(app(false), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_unknown_route() {
        assert_eq!(get_status(app(true), "/api/v1/nope").await, StatusCode::NOT_FOUND);
    }
}
