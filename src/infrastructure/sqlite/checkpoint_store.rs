//! SQLite implementation of `CheckpointStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::Checkpoint;
use crate::domain::ports::{CheckpointListOptions, CheckpointStore};

#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
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
struct CheckpointRow {
    id: String,
    worker_handle: String,
    goal: String,
    now: String,
    test: Option<String>,
    done_this_session: String,
    blockers: String,
    questions: String,
    next: String,
    created_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StorageError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Checkpoint {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            worker_handle: row.worker_handle,
            goal: row.goal,
            now: row.now,
            test: row.test,
            done_this_session: serde_json::from_str(&row.done_this_session)?,
            blockers: serde_json::from_str(&row.blockers)?,
            questions: serde_json::from_str(&row.questions)?,
            next: serde_json::from_str(&row.next)?,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let done_json = serde_json::to_string(&checkpoint.done_this_session)?;
        let blockers_json = serde_json::to_string(&checkpoint.blockers)?;
        let questions_json = serde_json::to_string(&checkpoint.questions)?;
        let next_json = serde_json::to_string(&checkpoint.next)?;

        sqlx::query(
            r#"INSERT INTO checkpoints (id, worker_handle, goal, now, test, done_this_session,
               blockers, questions, next, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(&checkpoint.worker_handle)
        .bind(&checkpoint.goal)
        .bind(&checkpoint.now)
        .bind(&checkpoint.test)
        .bind(&done_json)
        .bind(&blockers_json)
        .bind(&questions_json)
        .bind(&next_json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest(&self, worker_handle: &str) -> Result<Option<Checkpoint>, StorageError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT * FROM checkpoints WHERE worker_handle = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(worker_handle)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Checkpoint::try_from).transpose()
    }

    async fn list(&self, worker_handle: &str, options: &CheckpointListOptions) -> Result<Vec<Checkpoint>, StorageError> {
        let limit = options.limit.unwrap_or(i64::MAX as usize) as i64;
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT * FROM checkpoints WHERE worker_handle = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(worker_handle)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    async fn cleanup(&self, worker_handle: &str, keep_n: usize) -> Result<usize, StorageError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM checkpoints WHERE worker_handle = ? ORDER BY created_at DESC LIMIT -1 OFFSET ?",
        )
        .bind(worker_handle)
        .bind(keep_n as i64)
        .fetch_all(&self.pool)
        .await?;

        for (id,) in &ids {
            sqlx::query("DELETE FROM checkpoints WHERE id = ?").bind(id).execute(&self.pool).await?;
        }
        Ok(ids.len())
    }
}
