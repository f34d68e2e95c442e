//! Domain types shared by the pull and push paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::ExtractedEntry;
use crate::fingerprint::composite_digest;

// ============================================================================
// Files
// ============================================================================

/// Processing status of an ingested file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }
}

impl From<String> for FileStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => FileStatus::Completed,
            "failed" => FileStatus::Failed,
            _ => FileStatus::Processing,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered source of credential entries (maps to the `files` table).
///
/// The fingerprint is unique across all rows; a second registration with the
/// same fingerprint is rejected rather than merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedFile {
    /// Identifier assigned by the store
    pub id: i64,
    pub name: String,
    /// Size in bytes
    pub size: i64,
    pub fingerprint: String,
    pub source: String,
    pub description: String,
    /// File extension without the dot, e.g. `txt`
    pub file_type: String,
    /// Key of the agent that registered the file, if it came over the stream channel
    pub agent_key: Option<String>,
    pub status: FileStatus,
    /// Entries committed so far
    pub processed_count: i64,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Registration request for a new file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIngestedFile {
    pub name: String,
    pub size: i64,
    pub fingerprint: String,
    pub source: String,
    pub description: String,
    pub file_type: String,
    pub agent_key: Option<String>,
}

impl NewIngestedFile {
    pub fn new(name: impl Into<String>, size: i64, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            fingerprint: fingerprint.into(),
            source: String::new(),
            description: String::new(),
            file_type: String::new(),
            agent_key: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn with_agent_key(mut self, agent_key: impl Into<String>) -> Self {
        self.agent_key = Some(agent_key.into());
        self
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Canonical uniqueness key of a stored entry: `(file_id, url, username, password)`.
///
/// Fields are trimmed on construction. Comparison is case-sensitive for all
/// three text fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub file_id: i64,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl EntryKey {
    pub fn new(file_id: i64, url: &str, username: &str, password: &str) -> Self {
        Self {
            file_id,
            url: url.trim().to_string(),
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        }
    }

    pub fn from_extracted(file_id: i64, entry: &ExtractedEntry) -> Self {
        Self::new(file_id, &entry.url, &entry.username, &entry.password)
    }

    /// Digest backing the storage-level unique index together with `file_id`.
    pub fn digest(&self) -> String {
        composite_digest(&[&self.url, &self.username, &self.password])
    }
}

/// Entry awaiting insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCredentialEntry {
    pub key: EntryKey,
    /// Originating line number (1-based), when known
    pub line: Option<i64>,
}

impl NewCredentialEntry {
    pub fn new(key: EntryKey) -> Self {
        Self { key, line: None }
    }

    pub fn at_line(mut self, line: i64) -> Self {
        self.line = Some(line);
        self
    }
}

/// Stored credential entry (maps to the `entries` table). Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub id: i64,
    pub file_id: i64,
    pub url: String,
    pub username: String,
    pub password: String,
    pub line: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

// ============================================================================
// Agents
// ============================================================================

/// Lifecycle state of a collection agent.
///
/// `Compromised` is terminal from the ingestion side: nothing in the
/// ingestion paths moves an agent out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Compromised,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Compromised => "compromised",
        }
    }
}

impl From<String> for AgentStatus {
    /// Unknown values map to `Inactive` so they never pass the gate.
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => AgentStatus::Active,
            "compromised" => AgentStatus::Compromised,
            _ => AgentStatus::Inactive,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
