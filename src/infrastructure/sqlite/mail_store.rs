//! SQLite implementation of `MailStore` and `HandoffStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Handoff, HandoffStatus, MailMessage};
use crate::domain::ports::{HandoffStore, MailStore};

#[derive(Clone)]
pub struct SqliteMailStore {
    pool: SqlitePool,
}

impl SqliteMailStore {
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
struct MailRow {
    id: String,
    from_handle: String,
    to_handle: String,
    subject: Option<String>,
    body: String,
    read_at: Option<String>,
    created_at: String,
}

impl TryFrom<MailRow> for MailMessage {
    type Error = StorageError;

    fn try_from(row: MailRow) -> Result<Self, Self::Error> {
        Ok(MailMessage {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            from_handle: row.from_handle,
            to_handle: row.to_handle,
            subject: row.subject,
            body: row.body,
            read_at: row.read_at.map(|s| parse_rfc3339(&s)).transpose()?,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[async_trait]
impl MailStore for SqliteMailStore {
    async fn send(&self, from: &str, to: &str, body: &str, subject: Option<&str>) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO mail_messages (id, from_handle, to_handle, subject, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(from)
        .bind(to)
        .bind(subject)
        .bind(body)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_unread(&self, handle: &str) -> Result<Vec<MailMessage>, StorageError> {
        let rows: Vec<MailRow> = sqlx::query_as(
            "SELECT * FROM mail_messages WHERE to_handle = ? AND read_at IS NULL ORDER BY created_at ASC",
        )
        .bind(handle)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MailMessage::try_from).collect()
    }

    async fn mark_read(&self, mail_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE mail_messages SET read_at = ? WHERE id = ? AND read_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(mail_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct HandoffRow {
    id: String,
    from_handle: String,
    to_handle: String,
    context: String,
    checkpoint: Option<String>,
    status: String,
    outcome: Option<String>,
    accepted_at: Option<String>,
    created_at: String,
}

impl TryFrom<HandoffRow> for Handoff {
    type Error = StorageError;

    fn try_from(row: HandoffRow) -> Result<Self, Self::Error> {
        Ok(Handoff {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            from_handle: row.from_handle,
            to_handle: row.to_handle,
            context: serde_json::from_str(&row.context)?,
            checkpoint: row.checkpoint.map(|s| serde_json::from_str(&s)).transpose()?,
            status: HandoffStatus::parse_str(&row.status)
                .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", row.status)))?,
            outcome: row.outcome,
            accepted_at: row.accepted_at.map(|s| parse_rfc3339(&s)).transpose()?,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[async_trait]
impl HandoffStore for SqliteMailStore {
    async fn create(&self, handoff: &Handoff) -> Result<(), StorageError> {
        let context_json = serde_json::to_string(&handoff.context)?;
        let checkpoint_json = handoff.checkpoint.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO handoffs (id, from_handle, to_handle, context, checkpoint, status,
               outcome, accepted_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(handoff.id.to_string())
        .bind(&handoff.from_handle)
        .bind(&handoff.to_handle)
        .bind(&context_json)
        .bind(&checkpoint_json)
        .bind(handoff.status.as_str())
        .bind(&handoff.outcome)
        .bind(handoff.accepted_at.map(|t| t.to_rfc3339()))
        .bind(handoff.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Handoff>, StorageError> {
        let row: Option<HandoffRow> = sqlx::query_as("SELECT * FROM handoffs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Handoff::try_from).transpose()
    }

    async fn get_pending(&self, handle: &str) -> Result<Vec<Handoff>, StorageError> {
        let rows: Vec<HandoffRow> =
            sqlx::query_as("SELECT * FROM handoffs WHERE to_handle = ? AND status = 'pending' ORDER BY created_at")
                .bind(handle)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Handoff::try_from).collect()
    }

    async fn accept(&self, id: Uuid, accepted_at: DateTime<Utc>) -> Result<bool, StorageError> {
        self.get(id).await?.ok_or(StorageError::NotFound)?;
        let result = sqlx::query(
            "UPDATE handoffs SET status = 'accepted', accepted_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(accepted_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reject(&self, id: Uuid) -> Result<bool, StorageError> {
        self.get(id).await?.ok_or(StorageError::NotFound)?;
        let result = sqlx::query("UPDATE handoffs SET status = 'rejected' WHERE id = ? AND status = 'pending'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
