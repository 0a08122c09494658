//! SQLite implementation of `BlackboardStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{BlackboardMessage, BlackboardQuery, Priority};
use crate::domain::ports::BlackboardStore;

#[derive(Clone)]
pub struct SqliteBlackboardStore {
    pool: SqlitePool,
}

impl SqliteBlackboardStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct BlackboardRow {
    id: String,
    swarm_id: String,
    sender_handle: String,
    message_type: String,
    target_handle: Option<String>,
    priority: String,
    payload: String,
    read_by: String,
    created_at: String,
    archived_at: Option<String>,
}

impl TryFrom<BlackboardRow> for BlackboardMessage {
    type Error = StorageError;

    fn try_from(row: BlackboardRow) -> Result<Self, Self::Error> {
        let read_by: HashSet<String> = serde_json::from_str(&row.read_by)?;
        Ok(BlackboardMessage {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            swarm_id: row.swarm_id,
            sender_handle: row.sender_handle,
            message_type: row.message_type,
            target_handle: row.target_handle,
            priority: Priority::parse_str(&row.priority)
                .ok_or_else(|| StorageError::Serialization(format!("unknown priority: {}", row.priority)))?,
            payload: serde_json::from_str(&row.payload)?,
            read_by,
            created_at: parse_rfc3339(&row.created_at)?,
            archived_at: row.archived_at.map(|s| parse_rfc3339(&s)).transpose()?,
        })
    }
}

#[async_trait]
impl BlackboardStore for SqliteBlackboardStore {
    async fn post(
        &self,
        swarm_id: &str,
        sender: &str,
        message_type: &str,
        payload: serde_json::Value,
        target: Option<&str>,
        priority: Priority,
    ) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let payload_json = serde_json::to_string(&payload)?;

        sqlx::query(
            r#"INSERT INTO blackboard_messages (id, swarm_id, sender_handle, message_type,
               target_handle, priority, payload, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(swarm_id)
        .bind(sender)
        .bind(message_type)
        .bind(target)
        .bind(priority.as_str())
        .bind(&payload_json)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn read(&self, swarm_id: &str, query: &BlackboardQuery) -> Result<Vec<BlackboardMessage>, StorageError> {
        let limit = query.effective_limit() as i64;
        let rows: Vec<BlackboardRow> = sqlx::query_as(
            r#"SELECT * FROM blackboard_messages
               WHERE swarm_id = ? AND archived_at IS NULL
               AND (? IS NULL OR message_type = ?)
               AND (? IS NULL OR priority = ?)
               ORDER BY created_at ASC LIMIT ?"#,
        )
        .bind(swarm_id)
        .bind(&query.message_type)
        .bind(&query.message_type)
        .bind(query.priority.map(|p| p.as_str()))
        .bind(query.priority.map(|p| p.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let messages: Vec<BlackboardMessage> = rows.into_iter().map(BlackboardMessage::try_from).collect::<Result<_, _>>()?;

        if query.unread_only {
            if let Some(reader) = &query.reader_handle {
                return Ok(messages.into_iter().filter(|m| !m.read_by.contains(reader)).collect());
            }
        }
        Ok(messages)
    }

    async fn mark_read(&self, message_ids: &[Uuid], reader_handle: &str) -> Result<(), StorageError> {
        for id in message_ids {
            let row: Option<(String,)> = sqlx::query_as("SELECT read_by FROM blackboard_messages WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            let Some((read_by_json,)) = row else { continue };
            let mut read_by: HashSet<String> = serde_json::from_str(&read_by_json)?;
            if read_by.insert(reader_handle.to_string()) {
                let updated = serde_json::to_string(&read_by)?;
                sqlx::query("UPDATE blackboard_messages SET read_by = ? WHERE id = ?")
                    .bind(&updated)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn archive(&self, message_ids: &[Uuid]) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        for id in message_ids {
            sqlx::query("UPDATE blackboard_messages SET archived_at = ? WHERE id = ?")
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn archive_old(&self, swarm_id: &str, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let result = sqlx::query(
            "UPDATE blackboard_messages SET archived_at = ? WHERE swarm_id = ? AND archived_at IS NULL AND created_at < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(swarm_id)
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}
