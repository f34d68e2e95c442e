//! Agent stream frames
//!
//! One JSON object per line. The `type` field selects the frame kind:
//!
//! ```json
//! {"agent":"combolist-agent","agent_key":"K","type":"file",
//!  "raw":{"file":{"name":"dump.txt","size":1024,"hash":"H","source":"forum","type":"txt","description":""}}}
//! {"agent":"combolist-agent","agent_key":"K","type":"entrie","hash":"H",
//!  "raw":{"user_entrie":{"username":"alice","password":"pw"},"url_entrie":{"url":"https://a.com"}}}
//! ```

use serde::{Deserialize, Serialize};

use leakvault_common::{IngestError, Result};

/// Value of the `agent` field accepted on this channel.
pub const COMBOLIST_AGENT: &str = "combolist-agent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Announces a file whose entries will follow
    #[serde(rename = "file")]
    File {
        agent: String,
        #[serde(default)]
        agent_key: String,
        raw: FileRaw,
    },
    /// One credential belonging to the file identified by `hash`
    #[serde(rename = "entrie")]
    Entry {
        agent: String,
        #[serde(default)]
        agent_key: String,
        hash: String,
        raw: EntryRaw,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRaw {
    pub file: FileInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub hash: String,
    pub source: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryRaw {
    pub user_entrie: UserEntry,
    pub url_entrie: UrlEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlEntry {
    pub url: String,
}

impl Frame {
    /// Decode one line. Unknown kinds, unknown agents and invalid JSON are
    /// all [`IngestError::MalformedInput`].
    pub fn parse(line: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(line.trim())
            .map_err(|e| IngestError::MalformedInput(format!("frame: {}", e)))?;

        if frame.agent() != COMBOLIST_AGENT {
            return Err(IngestError::MalformedInput(format!(
                "unexpected agent '{}'",
                frame.agent()
            )));
        }
        Ok(frame)
    }

    pub fn agent(&self) -> &str {
        match self {
            Frame::File { agent, .. } | Frame::Entry { agent, .. } => agent,
        }
    }

    pub fn agent_key(&self) -> &str {
        match self {
            Frame::File { agent_key, .. } | Frame::Entry { agent_key, .. } => agent_key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::File { .. } => "file",
            Frame::Entry { .. } => "entrie",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Frame::File { .. })
    }
}
