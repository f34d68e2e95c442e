//! Agent persistence
//!
//! Agents are provisioned out of band; the ingestion paths only read them,
//! stamp activity and move them to `compromised`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use leakvault_common::{AgentStatus, IngestError, Result};
use leakvault_ingest::storage::storage_error;

/// A registered collection agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: i64,
    pub auth_key: String,
    pub platform: String,
    /// Seconds between collection runs, as declared by the agent
    pub collection_interval: i32,
    pub last_activity: Option<DateTime<Utc>>,
    pub data_processed: i64,
    pub status: AgentStatus,
    pub ip_address: Option<String>,
}

impl Agent {
    /// An active agent with no recorded activity.
    pub fn new(auth_key: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: 0,
            auth_key: auth_key.into(),
            platform: platform.into(),
            collection_interval: 0,
            last_activity: None,
            data_processed: 0,
            status: AgentStatus::Active,
            ip_address: None,
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_key(&self, auth_key: &str) -> Result<Option<Agent>>;

    /// Move the agent to `compromised`. Nothing in the ingestion paths
    /// moves it back.
    async fn mark_compromised(&self, auth_key: &str) -> Result<()>;

    /// Stamp the last activity time and, when known, the client address.
    async fn touch(&self, auth_key: &str, ip: Option<&str>) -> Result<()>;

    async fn add_processed(&self, auth_key: &str, count: i64) -> Result<()>;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: i64,
    auth_key: String,
    platform: String,
    collection_interval: i32,
    last_activity: Option<DateTime<Utc>>,
    data_processed: i64,
    status: String,
    ip_address: Option<String>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Self {
            id: row.id,
            auth_key: row.auth_key,
            platform: row.platform,
            collection_interval: row.collection_interval,
            last_activity: row.last_activity,
            data_processed: row.data_processed,
            status: AgentStatus::from(row.status),
            ip_address: row.ip_address,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgAgentRepository {
    pool: PgPool,
}

impl PgAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn expect_row(rows_affected: u64, auth_key: &str) -> Result<()> {
        if rows_affected == 0 {
            return Err(IngestError::NotFound(format!("agent {}", redact(auth_key))));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for PgAgentRepository {
    async fn find_by_key(&self, auth_key: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, AgentRow>(
            r#"
            SELECT id, auth_key, platform, collection_interval, last_activity,
                   data_processed, status, ip_address
            FROM agents
            WHERE auth_key = $1
            "#,
        )
        .bind(auth_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(Agent::from))
    }

    async fn mark_compromised(&self, auth_key: &str) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET status = 'compromised' WHERE auth_key = $1")
            .bind(auth_key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Self::expect_row(result.rows_affected(), auth_key)
    }

    async fn touch(&self, auth_key: &str, ip: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET last_activity = NOW(), ip_address = COALESCE($2, ip_address)
            WHERE auth_key = $1
            "#,
        )
        .bind(auth_key)
        .bind(ip)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Self::expect_row(result.rows_affected(), auth_key)
    }

    async fn add_processed(&self, auth_key: &str, count: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE agents SET data_processed = data_processed + $2 WHERE auth_key = $1")
                .bind(auth_key)
                .bind(count)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        Self::expect_row(result.rows_affected(), auth_key)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Agent table kept in process memory, keyed by auth key
#[derive(Debug, Default)]
pub struct MemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

impl MemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent, assigning the next identifier.
    pub async fn insert(&self, mut agent: Agent) -> i64 {
        let mut agents = self.agents.write().await;
        agent.id = agents.len() as i64 + 1;
        let id = agent.id;
        agents.insert(agent.auth_key.clone(), agent);
        id
    }

    pub async fn get(&self, auth_key: &str) -> Option<Agent> {
        self.agents.read().await.get(auth_key).cloned()
    }

    async fn update(&self, auth_key: &str, apply: impl FnOnce(&mut Agent)) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(auth_key)
            .ok_or_else(|| IngestError::NotFound(format!("agent {}", redact(auth_key))))?;
        apply(agent);
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for MemoryAgentRepository {
    async fn find_by_key(&self, auth_key: &str) -> Result<Option<Agent>> {
        Ok(self.get(auth_key).await)
    }

    async fn mark_compromised(&self, auth_key: &str) -> Result<()> {
        self.update(auth_key, |agent| agent.status = AgentStatus::Compromised)
            .await
    }

    async fn touch(&self, auth_key: &str, ip: Option<&str>) -> Result<()> {
        self.update(auth_key, |agent| {
            agent.last_activity = Some(Utc::now());
            if let Some(ip) = ip {
                agent.ip_address = Some(ip.to_string());
            }
        })
        .await
    }

    async fn add_processed(&self, auth_key: &str, count: i64) -> Result<()> {
        self.update(auth_key, |agent| agent.data_processed += count)
            .await
    }
}

/// First characters of a key, for log lines and error messages.
pub fn redact(auth_key: &str) -> String {
    let visible: String = auth_key.chars().take(4).collect();
    format!("{}***", visible)
}
