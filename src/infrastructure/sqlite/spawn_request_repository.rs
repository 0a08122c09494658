//! SQLite implementation of `SpawnRequestRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Priority, SpawnPayload, SpawnRequest, SpawnRequestStatus};
use crate::domain::ports::SpawnRequestRepository;

#[derive(Clone)]
pub struct SqliteSpawnRequestRepository {
    pool: SqlitePool,
}

impl SqliteSpawnRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SpawnRequestRow {
    id: String,
    requester_handle: String,
    target_agent_type: String,
    depth_level: i64,
    swarm_id: Option<String>,
    priority: String,
    status: String,
    payload: String,
    depends_on: String,
    blocked_by_count: i64,
    created_at: String,
    processed_at: Option<String>,
    spawned_worker_id: Option<String>,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

impl TryFrom<SpawnRequestRow> for SpawnRequest {
    type Error = StorageError;

    fn try_from(row: SpawnRequestRow) -> Result<Self, Self::Error> {
        let depends_on: HashSet<Uuid> = serde_json::from_str(&row.depends_on)?;
        Ok(SpawnRequest {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            requester_handle: row.requester_handle,
            target_agent_type: row.target_agent_type,
            depth_level: row.depth_level as u32,
            swarm_id: row.swarm_id,
            priority: Priority::parse_str(&row.priority)
                .ok_or_else(|| StorageError::Serialization(format!("unknown priority: {}", row.priority)))?,
            status: SpawnRequestStatus::parse_str(&row.status)
                .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", row.status)))?,
            payload: serde_json::from_str(&row.payload)?,
            depends_on,
            blocked_by_count: row.blocked_by_count as u32,
            created_at: parse_rfc3339(&row.created_at)?,
            processed_at: row.processed_at.map(|s| parse_rfc3339(&s)).transpose()?,
            spawned_worker_id: row
                .spawned_worker_id
                .map(|s| Uuid::parse_str(&s).map_err(|e| StorageError::Serialization(e.to_string())))
                .transpose()?,
        })
    }
}

#[async_trait]
impl SpawnRequestRepository for SqliteSpawnRequestRepository {
    async fn create(&self, request: &SpawnRequest) -> Result<(), StorageError> {
        let payload_json = serde_json::to_string(&request.payload)?;
        let depends_on_json = serde_json::to_string(&request.depends_on)?;

        sqlx::query(
            r#"INSERT INTO spawn_requests (id, requester_handle, target_agent_type, depth_level,
               swarm_id, priority, status, payload, depends_on, blocked_by_count, created_at,
               processed_at, spawned_worker_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request.id.to_string())
        .bind(&request.requester_handle)
        .bind(&request.target_agent_type)
        .bind(request.depth_level as i64)
        .bind(&request.swarm_id)
        .bind(request.priority.as_str())
        .bind(request.status.as_str())
        .bind(&payload_json)
        .bind(&depends_on_json)
        .bind(request.blocked_by_count as i64)
        .bind(request.created_at.to_rfc3339())
        .bind(request.processed_at.map(|t| t.to_rfc3339()))
        .bind(request.spawned_worker_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SpawnRequest>, StorageError> {
        let row: Option<SpawnRequestRow> = sqlx::query_as("SELECT * FROM spawn_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SpawnRequest::try_from).transpose()
    }

    async fn update(&self, request: &SpawnRequest) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"UPDATE spawn_requests SET status = ?, blocked_by_count = ?, processed_at = ?,
               spawned_worker_id = ? WHERE id = ?"#,
        )
        .bind(request.status.as_str())
        .bind(request.blocked_by_count as i64)
        .bind(request.processed_at.map(|t| t.to_rfc3339()))
        .bind(request.spawned_worker_id.map(|id| id.to_string()))
        .bind(request.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SpawnRequest>, StorageError> {
        let rows: Vec<SpawnRequestRow> = sqlx::query_as("SELECT * FROM spawn_requests ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SpawnRequest::try_from).collect()
    }

    async fn list_drainable(&self) -> Result<Vec<SpawnRequest>, StorageError> {
        let rows: Vec<SpawnRequestRow> = sqlx::query_as(
            "SELECT * FROM spawn_requests WHERE status = 'pending' AND blocked_by_count = 0
             ORDER BY CASE priority
               WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END,
               created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SpawnRequest::try_from).collect()
    }

    async fn count_status(&self, status: SpawnRequestStatus) -> Result<usize, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spawn_requests WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn decrement_dependents(&self, completed_id: Uuid) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, depends_on FROM spawn_requests")
            .fetch_all(&mut *tx)
            .await?;
        let needle = completed_id.to_string();
        for (id, depends_on_json) in rows {
            if depends_on_json.contains(&needle) {
                sqlx::query(
                    "UPDATE spawn_requests SET blocked_by_count = MAX(blocked_by_count - 1, 0) WHERE id = ?",
                )
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
