//! In-memory registry and entry store
//!
//! Used by `--dry-run` and by tests. Uniqueness is checked and recorded under
//! one write lock, matching the atomicity the Postgres constraints give.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use leakvault_common::{
    CredentialEntry, EntryKey, FileStatus, IngestError, IngestedFile, NewCredentialEntry,
    NewIngestedFile, Result,
};

use super::{EntryStore, FileRegistry};

#[derive(Debug, Default)]
struct State {
    files: Vec<IngestedFile>,
    by_fingerprint: HashMap<String, i64>,
    entries: Vec<CredentialEntry>,
    entry_ids: HashMap<(i64, String), i64>,
}

impl State {
    fn index(file_id: i64) -> Option<usize> {
        file_id.checked_sub(1).and_then(|index| usize::try_from(index).ok())
    }

    fn file(&self, file_id: i64) -> Result<&IngestedFile> {
        Self::index(file_id)
            .and_then(|index| self.files.get(index))
            .ok_or_else(|| IngestError::NotFound(format!("file {}", file_id)))
    }

    fn file_mut(&mut self, file_id: i64) -> Result<&mut IngestedFile> {
        Self::index(file_id)
            .and_then(|index| self.files.get_mut(index))
            .ok_or_else(|| IngestError::NotFound(format!("file {}", file_id)))
    }
}

/// Registry and entry store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn file_count(&self) -> usize {
        self.state.read().await.files.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl FileRegistry for MemoryStore {
    async fn register(&self, file: &NewIngestedFile) -> Result<i64> {
        let mut state = self.state.write().await;

        if state.by_fingerprint.contains_key(&file.fingerprint) {
            return Err(IngestError::AlreadyExists(file.fingerprint.clone()));
        }

        let id = state.files.len() as i64 + 1;
        state.files.push(IngestedFile {
            id,
            name: file.name.clone(),
            size: file.size,
            fingerprint: file.fingerprint.clone(),
            source: file.source.clone(),
            description: file.description.clone(),
            file_type: file.file_type.clone(),
            agent_key: file.agent_key.clone(),
            status: FileStatus::Processing,
            processed_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        });
        state.by_fingerprint.insert(file.fingerprint.clone(), id);

        Ok(id)
    }

    async fn lookup(&self, fingerprint: &str) -> Result<i64> {
        self.state
            .read()
            .await
            .by_fingerprint
            .get(fingerprint)
            .copied()
            .ok_or_else(|| IngestError::NotFound(format!("file with fingerprint {}", fingerprint)))
    }

    async fn get(&self, file_id: i64) -> Result<IngestedFile> {
        let state = self.state.read().await;
        state.file(file_id).cloned()
    }

    async fn add_processed(&self, file_id: i64, delta: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.file_mut(file_id)?.processed_count += delta;
        Ok(())
    }

    async fn finish(&self, file_id: i64, status: FileStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let file = state.file_mut(file_id)?;
        file.status = status;
        file.processed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn exists(&self, key: &EntryKey) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.entry_ids.contains_key(&(key.file_id, key.digest())))
    }

    async fn insert(&self, entry: &NewCredentialEntry) -> Result<i64> {
        let key = &entry.key;
        let slot = (key.file_id, key.digest());
        let mut state = self.state.write().await;

        state.file(key.file_id).map_err(|_| {
            IngestError::Rejected(format!("entry references unknown file {}", key.file_id))
        })?;
        if state.entry_ids.contains_key(&slot) {
            return Err(IngestError::DuplicateEntry(format!(
                "{} / {} in file {}",
                key.url, key.username, key.file_id
            )));
        }

        let id = state.entries.len() as i64 + 1;
        let now = Utc::now();
        state.entries.push(CredentialEntry {
            id,
            file_id: key.file_id,
            url: key.url.clone(),
            username: key.username.clone(),
            password: key.password.clone(),
            line: entry.line,
            created_at: now,
            processed_at: now,
        });
        state.entry_ids.insert(slot, id);

        Ok(id)
    }

    async fn list(&self, file_id: i64) -> Result<Vec<CredentialEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn count(&self, file_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.entries.iter().filter(|e| e.file_id == file_id).count() as i64)
    }
}
