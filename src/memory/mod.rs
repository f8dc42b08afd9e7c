// Conversational memory
// Storage failures are logged and answered with empty values so a turn never
// fails because history could not be read or written

#[cfg(test)]
mod tests;

use chrono::{Duration, Utc};
use tracing::{debug, error};

use crate::completion::Role;
use crate::database::Database;
use crate::database::sqlite::{
    Message, MessageMetadata, MessageQueries, NewMessage, Session, SessionMetadata,
    SessionQueries,
};

pub const DEFAULT_MAX_HISTORY: u32 = 10;
pub const DEFAULT_SESSION_LIST_LIMIT: u32 = 100;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct SessionStore {
    database: Database,
    max_history: u32,
}

impl SessionStore {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self {
            database,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    #[inline]
    pub fn with_max_history(mut self, max_history: u32) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    #[inline]
    pub fn max_history(&self) -> u32 {
        self.max_history
    }

    #[inline]
    pub async fn create_session(&self, session_id: &str, metadata: Option<&SessionMetadata>) -> bool {
        match SessionQueries::upsert(self.database.pool(), session_id, metadata).await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to create session {}: {:#}", session_id, e);
                false
            }
        }
    }

    /// Append a message; the session is created on first use
    #[inline]
    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<MessageMetadata>,
    ) -> bool {
        self.append_message(session_id, role, content, metadata)
            .await
            .is_some()
    }

    /// Same as [`add_message`](Self::add_message), returning the stored row
    #[inline]
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<MessageMetadata>,
    ) -> Option<Message> {
        let new_message = NewMessage {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            metadata,
        };

        match MessageQueries::append(self.database.pool(), new_message).await {
            Ok(message) => {
                debug!("Stored {} message {} in session {}", role, message.id, session_id);
                Some(message)
            }
            Err(e) => {
                error!("Failed to store message in session {}: {:#}", session_id, e);
                None
            }
        }
    }

    /// Oldest messages first, at most `limit` (default: the configured max history)
    #[inline]
    pub async fn get_history(&self, session_id: &str, limit: Option<u32>) -> Vec<Message> {
        let limit = limit.unwrap_or(self.max_history);
        match MessageQueries::history(self.database.pool(), session_id, i64::from(limit)).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to load history for session {}: {:#}", session_id, e);
                Vec::new()
            }
        }
    }

    #[inline]
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        SessionQueries::get_by_id(self.database.pool(), session_id)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to get session {}: {:#}", session_id, e);
                None
            })
    }

    #[inline]
    pub async fn list_sessions(&self, limit: Option<u32>) -> Vec<Session> {
        let limit = limit.unwrap_or(DEFAULT_SESSION_LIST_LIMIT);
        SessionQueries::list_recent(self.database.pool(), i64::from(limit))
            .await
            .unwrap_or_else(|e| {
                error!("Failed to list sessions: {:#}", e);
                Vec::new()
            })
    }

    #[inline]
    pub async fn delete_session(&self, session_id: &str) -> bool {
        SessionQueries::delete(self.database.pool(), session_id)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to delete session {}: {:#}", session_id, e);
                false
            })
    }

    /// Retention sweep: drop sessions not updated in the last `days` days
    #[inline]
    pub async fn clear_older_than(&self, days: u32) -> u64 {
        let cutoff = Utc::now().naive_utc() - Duration::days(i64::from(days));
        SessionQueries::delete_updated_before(self.database.pool(), cutoff)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to clear sessions older than {} days: {:#}", days, e);
                0
            })
    }

    /// Retention sweep followed by compaction of the database file when
    /// anything was removed
    #[inline]
    pub async fn prune(&self, days: u32) -> u64 {
        let removed = self.clear_older_than(days).await;
        if removed > 0 {
            self.compact().await;
        }
        removed
    }

    #[inline]
    pub async fn compact(&self) -> bool {
        match self.database.optimize().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to compact session database: {:#}", e);
                false
            }
        }
    }

    #[inline]
    pub async fn session_count(&self) -> i64 {
        SessionQueries::count(self.database.pool())
            .await
            .unwrap_or_else(|e| {
                error!("Failed to count sessions: {:#}", e);
                0
            })
    }

    #[inline]
    pub async fn message_count(&self, session_id: &str) -> i64 {
        MessageQueries::count_for_session(self.database.pool(), session_id)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to count messages for session {}: {:#}", session_id, e);
                0
            })
    }
}
