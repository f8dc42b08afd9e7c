#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::warn;

use crate::completion::Role;
use crate::content::ContentMetadata;

pub type SessionMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub session_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub metadata: Option<String>,
}

impl Session {
    /// Decoded session metadata; unreadable JSON decodes as empty
    #[inline]
    pub fn metadata_map(&self) -> SessionMetadata {
        self.metadata
            .as_deref()
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!("Session {} has unreadable metadata: {}", self.session_id, e);
                    None
                }
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: NaiveDateTime,
    pub metadata: Option<String>,
}

impl Message {
    #[inline]
    pub fn parsed_metadata(&self) -> Option<MessageMetadata> {
        let raw = self.metadata.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Message {} has unreadable metadata: {}", self.id, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: Option<MessageMetadata>,
}

/// Source attached to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSource {
    pub score: f32,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub sources: Vec<StoredSource>,
}
