//! SQLite implementation of `WorkerRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Worker, WorkerRole, WorkerStatus};
use crate::domain::ports::WorkerRepository;

#[derive(Clone)]
pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: String,
    handle: String,
    team_name: String,
    role: String,
    status: String,
    swarm_id: Option<String>,
    depth_level: i64,
    session_id: Option<String>,
    restart_count: i64,
    last_heartbeat: Option<String>,
    initial_prompt: Option<String>,
    worktree_path: Option<String>,
    worktree_branch: Option<String>,
    auto_restart: bool,
    created_at: String,
    dismissed_at: Option<String>,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

impl TryFrom<WorkerRow> for Worker {
    type Error = StorageError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        Ok(Worker {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            handle: row.handle,
            team_name: row.team_name,
            role: WorkerRole::parse_str(&row.role)
                .ok_or_else(|| StorageError::Serialization(format!("unknown role: {}", row.role)))?,
            status: WorkerStatus::parse_str(&row.status)
                .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", row.status)))?,
            swarm_id: row.swarm_id,
            depth_level: row.depth_level as u32,
            session_id: row.session_id,
            restart_count: row.restart_count as u32,
            last_heartbeat: row.last_heartbeat.map(|s| parse_rfc3339(&s)).transpose()?,
            initial_prompt: row.initial_prompt,
            worktree_path: row.worktree_path,
            worktree_branch: row.worktree_branch,
            auto_restart: row.auto_restart,
            created_at: parse_rfc3339(&row.created_at)?,
            dismissed_at: row.dismissed_at.map(|s| parse_rfc3339(&s)).transpose()?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn create(&self, worker: &Worker) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO workers (id, handle, team_name, role, status, swarm_id, depth_level,
               session_id, restart_count, last_heartbeat, initial_prompt, worktree_path,
               worktree_branch, auto_restart, created_at, dismissed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(worker.id.to_string())
        .bind(&worker.handle)
        .bind(&worker.team_name)
        .bind(worker.role.as_str())
        .bind(worker.status.as_str())
        .bind(&worker.swarm_id)
        .bind(worker.depth_level as i64)
        .bind(&worker.session_id)
        .bind(worker.restart_count as i64)
        .bind(worker.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(&worker.initial_prompt)
        .bind(&worker.worktree_path)
        .bind(&worker.worktree_branch)
        .bind(worker.auto_restart)
        .bind(worker.created_at.to_rfc3339())
        .bind(worker.dismissed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>, StorageError> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Worker::try_from).transpose()
    }

    async fn get_by_handle(&self, team_name: &str, handle: &str) -> Result<Option<Worker>, StorageError> {
        let row: Option<WorkerRow> =
            sqlx::query_as("SELECT * FROM workers WHERE team_name = ? AND handle = ?")
                .bind(team_name)
                .bind(handle)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Worker::try_from).transpose()
    }

    async fn update(&self, worker: &Worker) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"UPDATE workers SET status = ?, swarm_id = ?, session_id = ?, restart_count = ?,
               last_heartbeat = ?, worktree_path = ?, worktree_branch = ?, dismissed_at = ?
               WHERE id = ?"#,
        )
        .bind(worker.status.as_str())
        .bind(&worker.swarm_id)
        .bind(&worker.session_id)
        .bind(worker.restart_count as i64)
        .bind(worker.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(&worker.worktree_path)
        .bind(&worker.worktree_branch)
        .bind(worker.dismissed_at.map(|t| t.to_rfc3339()))
        .bind(worker.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Worker>, StorageError> {
        let rows: Vec<WorkerRow> = sqlx::query_as("SELECT * FROM workers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Worker::try_from).collect()
    }

    async fn list_non_dismissed(&self) -> Result<Vec<Worker>, StorageError> {
        let rows: Vec<WorkerRow> =
            sqlx::query_as("SELECT * FROM workers WHERE status != 'dismissed' ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Worker::try_from).collect()
    }

    async fn count_non_dismissed(&self) -> Result<usize, StorageError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workers WHERE status != 'dismissed'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn list_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>, StorageError> {
        let rows: Vec<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE status = ? ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Worker::try_from).collect()
    }
}
