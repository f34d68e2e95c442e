//! Agent gate
//!
//! Every push into the store, over HTTP or the agent stream, passes through
//! [`AgentGate::authorize`] first. All refusals surface as one
//! [`IngestError::Unauthorized`]; the specific reason only reaches the logs.

use std::sync::Arc;
use tracing::{error, warn};

use leakvault_common::{AgentStatus, IngestError, Result};

use super::repository::{redact, Agent, AgentRepository};

#[derive(Clone)]
pub struct AgentGate {
    agents: Arc<dyn AgentRepository>,
}

impl AgentGate {
    pub fn new(agents: Arc<dyn AgentRepository>) -> Self {
        Self { agents }
    }

    /// Resolve `auth_key` to an active agent registered for `platform`.
    ///
    /// A platform mismatch also moves the agent to `compromised`, so the key
    /// stays refused afterwards whatever platform it presents.
    #[tracing::instrument(skip(self, auth_key), fields(agent = %redact(auth_key.trim())))]
    pub async fn authorize(&self, auth_key: &str, platform: &str) -> Result<Agent> {
        let auth_key = auth_key.trim();
        if auth_key.is_empty() {
            return Err(IngestError::Unauthorized("missing agent key".to_string()));
        }

        let agent = self
            .agents
            .find_by_key(auth_key)
            .await?
            .ok_or_else(|| IngestError::Unauthorized("unknown agent key".to_string()))?;

        if agent.status != AgentStatus::Active {
            return Err(IngestError::Unauthorized(format!(
                "agent {} is {}",
                agent.id, agent.status
            )));
        }

        if agent.platform != platform {
            warn!(
                agent_id = agent.id,
                declared = %agent.platform,
                expected = %platform,
                "Platform mismatch, marking agent compromised"
            );
            if let Err(err) = self.agents.mark_compromised(auth_key).await {
                error!(agent_id = agent.id, error = %err, "Failed to mark agent compromised");
            }
            return Err(IngestError::Unauthorized(format!(
                "agent {} platform mismatch",
                agent.id
            )));
        }

        Ok(agent)
    }

    pub async fn touch(&self, auth_key: &str, ip: Option<&str>) -> Result<()> {
        self.agents.touch(auth_key.trim(), ip).await
    }

    pub async fn record_processed(&self, auth_key: &str, count: usize) -> Result<()> {
        let count = i64::try_from(count)
            .map_err(|_| IngestError::MalformedInput(format!("count {} out of range", count)))?;
        self.agents.add_processed(auth_key.trim(), count).await
    }
}
