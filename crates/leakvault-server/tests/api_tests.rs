//! API integration tests for the leakvault server
//!
//! The full router is exercised with in-memory repositories, so these run
//! without a database.
//!
//! Coverage includes:
//! - Agent gate refusals and their uniform body
//! - Request validation order (authorization before payload)
//! - Bulk submission storage, replay and in-batch duplicates
//! - A storage failure midway through a submission
//! - Platform mismatch compromising the agent
//! - Health endpoint

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use leakvault_common::{AgentStatus, IngestError, Result};
use leakvault_server::api::{create_router, AppState, HealthCheck};
use leakvault_server::config::CorsConfig;
use leakvault_server::features::agents::{Agent, AgentGate, MemoryAgentRepository};
use leakvault_server::features::combolists::{
    MemorySubmissionRepository, SubmissionMetadata, SubmissionRecord, SubmissionRepository,
};
use leakvault_server::features::FeatureState;
use leakvault_server::AppError;

const BULK: &str = "/api/v1/combolists/bulk";

// ============================================================================
// Helper Functions
// ============================================================================

struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn check(&self) -> std::result::Result<(), AppError> {
        Ok(())
    }
}

/// Memory repository that loses its connection on one email while `down`
struct FlakyRecords {
    inner: Arc<MemorySubmissionRepository>,
    failing_email: &'static str,
    down: AtomicBool,
    attempts: AtomicUsize,
}

#[async_trait]
impl SubmissionRepository for FlakyRecords {
    async fn find_metadata(&self, hash: &str) -> Result<Option<i64>> {
        self.inner.find_metadata(hash).await
    }

    async fn insert_metadata(&self, hash: &str, metadata: &SubmissionMetadata) -> Result<i64> {
        self.inner.insert_metadata(hash, metadata).await
    }

    async fn insert_record(&self, metadata_id: i64, record: &SubmissionRecord) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) && record.email == self.failing_email {
            return Err(IngestError::Persistence("connection reset".to_string()));
        }
        self.inner.insert_record(metadata_id, record).await
    }

    async fn count_records(&self, metadata_id: i64) -> Result<i64> {
        self.inner.count_records(metadata_id).await
    }
}

struct TestApp {
    router: Router,
    agents: Arc<MemoryAgentRepository>,
    submissions: Arc<MemorySubmissionRepository>,
}

async fn create_test_app() -> TestApp {
    let submissions = Arc::new(MemorySubmissionRepository::new());
    let (router, agents) = create_router_with(submissions.clone()).await;

    TestApp {
        router,
        agents,
        submissions,
    }
}

async fn create_router_with(
    submissions: Arc<dyn SubmissionRepository>,
) -> (Router, Arc<MemoryAgentRepository>) {
    let agents = Arc::new(MemoryAgentRepository::new());
    agents.insert(Agent::new("combo-key", "combolist")).await;
    agents.insert(Agent::new("stealer-key", "stealer")).await;
    agents
        .insert(Agent::new("idle-key", "combolist").with_status(AgentStatus::Inactive))
        .await;
    agents
        .insert(Agent::new("burned-key", "combolist").with_status(AgentStatus::Compromised))
        .await;

    let state = AppState {
        features: FeatureState {
            gate: AgentGate::new(agents.clone()),
            submissions,
            combolist_platform: "combolist".to_string(),
        },
        health: Arc::new(AlwaysHealthy),
    };
    let cors = CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: true,
    };

    (create_router(state, &cors), agents)
}

/// Send a raw body to the bulk endpoint
async fn post_bulk(app: &Router, auth: Option<&str>, body: String) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .uri(BULK)
        .method("POST")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(key) = auth {
        request = request.header("authorization", key);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, value)
}

fn submission(hash: &str, records: &[(&str, &str)]) -> String {
    let data: Vec<Value> = records
        .iter()
        .map(|(email, password)| {
            json!({
                "email": email,
                "password": password,
                "username": email.split('@').next().unwrap_or_default(),
                "domain": email.split('@').nth(1).unwrap_or_default(),
            })
        })
        .collect();

    json!({
        "hash": hash,
        "metadata": {"source": "telegram", "tags": ["combolist"], "notes": ""},
        "data": data,
    })
    .to_string()
}

// ============================================================================
// Authorization
// ============================================================================

#[tokio::test]
async fn test_refusals_share_one_body() {
    let app = create_test_app().await;
    let body = submission("h1", &[("a@x.com", "pw")]);

    for auth in [None, Some(""), Some("unknown"), Some("idle-key"), Some("burned-key")] {
        let (status, value) = post_bulk(&app.router, auth, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "auth {:?}", auth);
        assert_eq!(value, json!({"error": "not authorized"}));
    }

    assert_eq!(app.submissions.metadata_count().await, 0);
}

#[tokio::test]
async fn test_authorization_is_checked_before_payload() {
    let app = create_test_app().await;

    let (status, _) = post_bulk(&app.router, Some("unknown"), "{not json".to_string()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, value) = post_bulk(&app.router, Some("combo-key"), "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["success"], json!(false));
    assert_eq!(value["error"]["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_platform_mismatch_compromises_agent() {
    let app = create_test_app().await;
    let body = submission("h1", &[("a@x.com", "pw")]);

    let (status, value) = post_bulk(&app.router, Some("stealer-key"), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(value, json!({"error": "not authorized"}));

    let agent = app.agents.get("stealer-key").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Compromised);

    let (status, _) = post_bulk(&app.router, Some("stealer-key"), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.submissions.metadata_count().await, 0);
}

// ============================================================================
// Submissions
// ============================================================================

#[tokio::test]
async fn test_empty_hash_is_rejected() {
    let app = create_test_app().await;

    let (status, value) =
        post_bulk(&app.router, Some("combo-key"), submission("   ", &[("a@x.com", "pw")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error"]["code"], json!("BAD_REQUEST"));
    assert_eq!(app.submissions.metadata_count().await, 0);
}

#[tokio::test]
async fn test_submission_is_stored() {
    let app = create_test_app().await;
    let body = submission("h1", &[("a@x.com", "pw1"), ("b@x.com", "pw2"), ("a@x.com", "pw1")]);

    let (status, value) = post_bulk(&app.router, Some("combo-key"), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["data"]["received"], json!(3));
    assert_eq!(value["data"]["inserted"], json!(2));
    assert_eq!(value["data"]["duplicates"], json!(1));
    assert_eq!(value["data"]["metadata_reused"], json!(false));

    assert_eq!(app.submissions.metadata_count().await, 1);
    assert_eq!(app.submissions.record_count().await, 2);

    let agent = app.agents.get("combo-key").await.unwrap();
    assert_eq!(agent.data_processed, 3);
    assert_eq!(agent.ip_address.as_deref(), Some("203.0.113.7"));
    assert!(agent.last_activity.is_some());
}

#[tokio::test]
async fn test_resubmission_is_idempotent() {
    let app = create_test_app().await;
    let body = submission("h1", &[("a@x.com", "pw1"), ("b@x.com", "pw2")]);

    let (_, first) = post_bulk(&app.router, Some("combo-key"), body.clone()).await;
    let (status, second) = post_bulk(&app.router, Some("combo-key"), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["metadata_id"], first["data"]["metadata_id"]);
    assert_eq!(second["data"]["metadata_reused"], json!(true));
    assert_eq!(second["data"]["inserted"], json!(0));
    assert_eq!(second["data"]["duplicates"], json!(2));

    assert_eq!(app.submissions.metadata_count().await, 1);
    assert_eq!(app.submissions.record_count().await, 2);
}

#[tokio::test]
async fn test_submission_without_records() {
    let app = create_test_app().await;

    let (status, value) =
        post_bulk(&app.router, Some("combo-key"), json!({"hash": "h-empty"}).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["received"], json!(0));
    assert_eq!(app.submissions.metadata_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_identical_submissions() {
    let app = create_test_app().await;
    let body = submission("race", &[("a@x.com", "pw1"), ("b@x.com", "pw2")]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            post_bulk(&router, Some("combo-key"), body).await.0
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(app.submissions.metadata_count().await, 1);
    assert_eq!(app.submissions.record_count().await, 2);
}

#[tokio::test]
async fn test_record_failure_midway_keeps_earlier_records() {
    let memory = Arc::new(MemorySubmissionRepository::new());
    let flaky = Arc::new(FlakyRecords {
        inner: memory.clone(),
        failing_email: "c@x.com",
        down: AtomicBool::new(true),
        attempts: AtomicUsize::new(0),
    });
    let (router, agents) = create_router_with(flaky.clone()).await;
    let body = submission(
        "h-flaky",
        &[("a@x.com", "pw1"), ("b@x.com", "pw2"), ("c@x.com", "pw3"), ("d@x.com", "pw4")],
    );

    let (status, value) = post_bulk(&router, Some("combo-key"), body.clone()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(value["error"]["code"], json!("INTERNAL_ERROR"));
    // Stops at the failing record; the ones before it stay committed
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(memory.metadata_count().await, 1);
    assert_eq!(memory.record_count().await, 2);
    assert_eq!(agents.get("combo-key").await.unwrap().data_processed, 0);

    // A replay once storage is back stores the rest
    flaky.down.store(false, Ordering::SeqCst);
    let (status, value) = post_bulk(&router, Some("combo-key"), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["metadata_reused"], json!(true));
    assert_eq!(value["data"]["inserted"], json!(2));
    assert_eq!(value["data"]["duplicates"], json!(2));
    assert_eq!(memory.record_count().await, 4);
    assert_eq!(agents.get("combo-key").await.unwrap().data_processed, 4);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;

    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["status"], json!("healthy"));
}
