//! SQLite implementation of the workflow repository ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{
    ExecutionStatus, StepStatus, StepType, TriggerType, WorkflowDefinition, WorkflowDefinitionBody,
    WorkflowExecution, WorkflowStep, WorkflowTrigger,
};
use crate::domain::ports::{
    WorkflowDefinitionRepository, WorkflowExecutionRepository, WorkflowStepRepository, WorkflowTriggerRepository,
};

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

#[derive(Clone)]
pub struct SqliteWorkflowDefinitionRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowDefinitionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DefinitionRow {
    id: String,
    name: String,
    version: i64,
    definition: String,
    is_template: i64,
}

impl TryFrom<DefinitionRow> for WorkflowDefinition {
    type Error = StorageError;

    fn try_from(row: DefinitionRow) -> Result<Self, Self::Error> {
        let definition: WorkflowDefinitionBody = serde_json::from_str(&row.definition)?;
        Ok(WorkflowDefinition {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            name: row.name,
            version: row.version as u32,
            definition,
            is_template: row.is_template != 0,
        })
    }
}

#[async_trait]
impl WorkflowDefinitionRepository for SqliteWorkflowDefinitionRepository {
    async fn create(&self, definition: &WorkflowDefinition) -> Result<(), StorageError> {
        let body_json = serde_json::to_string(&definition.definition)?;
        sqlx::query(
            "INSERT INTO workflow_definitions (id, name, version, definition, is_template) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(definition.id.to_string())
        .bind(&definition.name)
        .bind(definition.version as i64)
        .bind(&body_json)
        .bind(definition.is_template as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StorageError> {
        let row: Option<DefinitionRow> = sqlx::query_as("SELECT * FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowDefinition::try_from).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<WorkflowDefinition>, StorageError> {
        let row: Option<DefinitionRow> = sqlx::query_as(
            "SELECT * FROM workflow_definitions WHERE name = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowDefinition::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, StorageError> {
        let rows: Vec<DefinitionRow> = sqlx::query_as("SELECT * FROM workflow_definitions")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowDefinition::try_from).collect()
    }
}

#[derive(Clone)]
pub struct SqliteWorkflowExecutionRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    swarm_id: Option<String>,
    status: String,
    context: String,
    created_by: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = StorageError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(WorkflowExecution {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            workflow_id: Uuid::parse_str(&row.workflow_id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            swarm_id: row.swarm_id,
            status: ExecutionStatus::parse_str(&row.status)
                .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", row.status)))?,
            context: serde_json::from_str(&row.context)?,
            created_by: row.created_by,
            started_at: row.started_at.map(|s| parse_rfc3339(&s)).transpose()?,
            completed_at: row.completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
            error: row.error,
        })
    }
}

#[async_trait]
impl WorkflowExecutionRepository for SqliteWorkflowExecutionRepository {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StorageError> {
        let context_json = serde_json::to_string(&execution.context)?;
        sqlx::query(
            r#"INSERT INTO workflow_executions (id, workflow_id, swarm_id, status, context,
               created_by, started_at, completed_at, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.swarm_id)
        .bind(execution.status.as_str())
        .bind(&context_json)
        .bind(&execution.created_by)
        .bind(execution.started_at.map(|t| t.to_rfc3339()))
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StorageError> {
        let row: Option<ExecutionRow> = sqlx::query_as("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowExecution::try_from).transpose()
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), StorageError> {
        let context_json = serde_json::to_string(&execution.context)?;
        let result = sqlx::query(
            r#"UPDATE workflow_executions SET status = ?, context = ?, started_at = ?,
               completed_at = ?, error = ? WHERE id = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&context_json)
        .bind(execution.started_at.map(|t| t.to_rfc3339()))
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(&execution.error)
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<WorkflowExecution>, StorageError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as("SELECT * FROM workflow_executions WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowExecution::try_from).collect()
    }
}

#[derive(Clone)]
pub struct SqliteWorkflowStepRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowStepRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    execution_id: String,
    step_key: String,
    step_type: String,
    status: String,
    config: String,
    guard: Option<String>,
    depends_on: String,
    blocked_by_count: i64,
    on_failure: String,
    output: Option<String>,
    retry_count: i64,
    max_retries: i64,
    timeout_ms: Option<i64>,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl TryFrom<StepRow> for WorkflowStep {
    type Error = StorageError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(WorkflowStep {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            execution_id: Uuid::parse_str(&row.execution_id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            step_key: row.step_key,
            step_type: StepType::parse_str(&row.step_type)
                .ok_or_else(|| StorageError::Serialization(format!("unknown step_type: {}", row.step_type)))?,
            status: StepStatus::parse_str(&row.status)
                .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", row.status)))?,
            config: serde_json::from_str(&row.config)?,
            guard: row.guard,
            depends_on: serde_json::from_str(&row.depends_on)?,
            blocked_by_count: row.blocked_by_count as u32,
            on_failure: crate::domain::models::OnFailure::parse_str(&row.on_failure)
                .ok_or_else(|| StorageError::Serialization(format!("unknown on_failure: {}", row.on_failure)))?,
            output: row.output.map(|s| serde_json::from_str(&s)).transpose()?,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            timeout_ms: row.timeout_ms.map(|v| v as u64),
            started_at: row.started_at.map(|s| parse_rfc3339(&s)).transpose()?,
            completed_at: row.completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
            error: row.error,
        })
    }
}

#[async_trait]
impl WorkflowStepRepository for SqliteWorkflowStepRepository {
    async fn create(&self, step: &WorkflowStep) -> Result<(), StorageError> {
        let config_json = serde_json::to_string(&step.config)?;
        let depends_on_json = serde_json::to_string(&step.depends_on)?;

        sqlx::query(
            r#"INSERT INTO workflow_steps (id, execution_id, step_key, step_type, status, config,
               guard, depends_on, blocked_by_count, on_failure, output, retry_count, max_retries,
               timeout_ms, started_at, completed_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.execution_id.to_string())
        .bind(&step.step_key)
        .bind(step.step_type.as_str())
        .bind(step.status.as_str())
        .bind(&config_json)
        .bind(&step.guard)
        .bind(&depends_on_json)
        .bind(step.blocked_by_count as i64)
        .bind(step.on_failure.as_str())
        .bind(step.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(step.retry_count as i64)
        .bind(step.max_retries as i64)
        .bind(step.timeout_ms.map(|v| v as i64))
        .bind(step.started_at.map(|t| t.to_rfc3339()))
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(&step.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowStep>, StorageError> {
        let row: Option<StepRow> = sqlx::query_as("SELECT * FROM workflow_steps WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowStep::try_from).transpose()
    }

    async fn update(&self, step: &WorkflowStep) -> Result<(), StorageError> {
        let output_json = step.output.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"UPDATE workflow_steps SET status = ?, blocked_by_count = ?, output = ?,
               retry_count = ?, started_at = ?, completed_at = ?, error = ? WHERE id = ?"#,
        )
        .bind(step.status.as_str())
        .bind(step.blocked_by_count as i64)
        .bind(&output_json)
        .bind(step.retry_count as i64)
        .bind(step.started_at.map(|t| t.to_rfc3339()))
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(&step.error)
        .bind(step.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_for_execution(&self, execution_id: Uuid) -> Result<Vec<WorkflowStep>, StorageError> {
        let rows: Vec<StepRow> = sqlx::query_as("SELECT * FROM workflow_steps WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowStep::try_from).collect()
    }

    async fn get_by_key(&self, execution_id: Uuid, step_key: &str) -> Result<Option<WorkflowStep>, StorageError> {
        let row: Option<StepRow> =
            sqlx::query_as("SELECT * FROM workflow_steps WHERE execution_id = ? AND step_key = ?")
                .bind(execution_id.to_string())
                .bind(step_key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WorkflowStep::try_from).transpose()
    }

    async fn decrement_dependents(&self, execution_id: Uuid, completed_key: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String, String, i64, String)> = sqlx::query_as(
            "SELECT id, depends_on, blocked_by_count, status FROM workflow_steps WHERE execution_id = ?",
        )
        .bind(execution_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        for (id, depends_on_json, blocked_by_count, status) in rows {
            let depends_on: Vec<String> = serde_json::from_str(&depends_on_json)?;
            if !depends_on.iter().any(|d| d == completed_key) {
                continue;
            }
            let new_count = (blocked_by_count - 1).max(0);
            let new_status = if new_count == 0 && status == "pending" { "ready" } else { status.as_str() };
            sqlx::query("UPDATE workflow_steps SET blocked_by_count = ?, status = ? WHERE id = ?")
                .bind(new_count)
                .bind(new_status)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_ready_steps(&self, execution_id: Uuid, limit: usize) -> Result<Vec<WorkflowStep>, StorageError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT * FROM workflow_steps WHERE execution_id = ? AND status = 'ready' LIMIT ?",
        )
        .bind(execution_id.to_string())
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now().to_rfc3339();
        for row in &rows {
            sqlx::query("UPDATE workflow_steps SET status = 'running', started_at = ? WHERE id = ?")
                .bind(&now)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        rows.into_iter()
            .map(|mut r| {
                r.status = "running".to_string();
                r.started_at = Some(now.clone());
                WorkflowStep::try_from(r)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct SqliteWorkflowTriggerRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowTriggerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TriggerRow {
    id: String,
    workflow_id: String,
    trigger_type: String,
    config: String,
    is_enabled: i64,
    last_fired_at: Option<String>,
    fire_count: i64,
}

impl TryFrom<TriggerRow> for WorkflowTrigger {
    type Error = StorageError;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(WorkflowTrigger {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            workflow_id: Uuid::parse_str(&row.workflow_id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            trigger_type: TriggerType::parse_str(&row.trigger_type)
                .ok_or_else(|| StorageError::Serialization(format!("unknown trigger_type: {}", row.trigger_type)))?,
            config: serde_json::from_str(&row.config)?,
            is_enabled: row.is_enabled != 0,
            last_fired_at: row.last_fired_at.map(|s| parse_rfc3339(&s)).transpose()?,
            fire_count: row.fire_count as u64,
        })
    }
}

#[async_trait]
impl WorkflowTriggerRepository for SqliteWorkflowTriggerRepository {
    async fn create(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError> {
        let config_json = serde_json::to_string(&trigger.config)?;
        sqlx::query(
            r#"INSERT INTO workflow_triggers (id, workflow_id, trigger_type, config, is_enabled,
               last_fired_at, fire_count) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.workflow_id.to_string())
        .bind(trigger.trigger_type.as_str())
        .bind(&config_json)
        .bind(trigger.is_enabled as i64)
        .bind(trigger.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(trigger.fire_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowTrigger>, StorageError> {
        let row: Option<TriggerRow> = sqlx::query_as("SELECT * FROM workflow_triggers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowTrigger::try_from).transpose()
    }

    async fn update(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE workflow_triggers SET is_enabled = ?, last_fired_at = ?, fire_count = ? WHERE id = ?",
        )
        .bind(trigger.is_enabled as i64)
        .bind(trigger.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(trigger.fire_count as i64)
        .bind(trigger.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_enabled(&self) -> Result<Vec<WorkflowTrigger>, StorageError> {
        let rows: Vec<TriggerRow> = sqlx::query_as("SELECT * FROM workflow_triggers WHERE is_enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowTrigger::try_from).collect()
    }
}
