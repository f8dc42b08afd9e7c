
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

const SESSION_COLUMNS: &str = "session_id, created_at, updated_at, metadata";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, timestamp, metadata";

fn encode_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode metadata")
}

pub struct SessionQueries;

impl SessionQueries {
    /// Insert the session or refresh its metadata when it already exists
    #[inline]
    pub async fn upsert(
        pool: &SqlitePool,
        session_id: &str,
        metadata: Option<&SessionMetadata>,
    ) -> Result<Session> {
        let now = Utc::now().naive_utc();
        let metadata = encode_json(metadata)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, created_at, updated_at, metadata)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (session_id) DO UPDATE
            SET metadata = COALESCE(excluded.metadata, sessions.metadata)
            "#,
        )
        .bind(session_id)
        .bind(now)
        .bind(now)
        .bind(metadata)
        .execute(pool)
        .await
        .context("Failed to upsert session")?;

        Self::get_by_id(pool, session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted session"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, session_id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?");
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get session by id")?;

        Ok(session)
    }

    #[inline]
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, session_id ASC LIMIT ?"
        );
        let sessions = sqlx::query_as::<_, Session>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("Failed to list sessions")?;

        Ok(sessions)
    }

    /// Delete a session; its messages go with it through the foreign key cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(pool)
            .await
            .context("Failed to delete session")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete_updated_before(pool: &SqlitePool, cutoff: NaiveDateTime) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE updated_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await
            .context("Failed to delete old sessions")?;

        debug!(
            "Deleted {} sessions last updated before {}",
            result.rows_affected(),
            cutoff
        );
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(pool)
            .await
            .context("Failed to count sessions")?;

        Ok(count)
    }
}

pub struct MessageQueries;

impl MessageQueries {
    /// Append a message, creating the session row if needed and bumping its
    /// `updated_at`, all in one transaction
    #[inline]
    pub async fn append(pool: &SqlitePool, new_message: NewMessage) -> Result<Message> {
        let now = Utc::now().naive_utc();
        let metadata = encode_json(new_message.metadata.as_ref())?;

        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (session_id, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(&new_message.session_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to ensure session for message")?;

        let id = sqlx::query(
            "INSERT INTO messages (session_id, role, content, timestamp, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new_message.session_id)
        .bind(new_message.role)
        .bind(&new_message.content)
        .bind(now)
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?
        .last_insert_rowid();

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE session_id = ?")
            .bind(now)
            .bind(&new_message.session_id)
            .execute(&mut *tx)
            .await
            .context("Failed to touch session")?;

        tx.commit().await.context("Failed to commit message")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve inserted message"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Message>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let message = sqlx::query_as::<_, Message>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get message by id")?;

        Ok(message)
    }

    /// Oldest `limit` messages of a session in chronological order
    #[inline]
    pub async fn history(pool: &SqlitePool, session_id: &str, limit: i64) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? ORDER BY timestamp ASC, id ASC LIMIT ?"
        );
        let messages = sqlx::query_as::<_, Message>(&query)
            .bind(session_id)
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("Failed to load session history")?;

        Ok(messages)
    }

    #[inline]
    pub async fn count_for_session(pool: &SqlitePool, session_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .context("Failed to count messages")?;

        Ok(count)
    }
}
