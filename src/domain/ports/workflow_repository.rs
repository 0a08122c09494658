//! Workflow repository ports.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{WorkflowDefinition, WorkflowExecution, WorkflowStep, WorkflowTrigger};

#[async_trait]
pub trait WorkflowDefinitionRepository: Send + Sync {
    async fn create(&self, definition: &WorkflowDefinition) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StorageError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<WorkflowDefinition>, StorageError>;
    async fn list(&self) -> Result<Vec<WorkflowDefinition>, StorageError>;
}

#[async_trait]
pub trait WorkflowExecutionRepository: Send + Sync {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StorageError>;
    async fn update(&self, execution: &WorkflowExecution) -> Result<(), StorageError>;
    async fn list_running(&self) -> Result<Vec<WorkflowExecution>, StorageError>;
}

#[async_trait]
pub trait WorkflowStepRepository: Send + Sync {
    async fn create(&self, step: &WorkflowStep) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowStep>, StorageError>;
    async fn update(&self, step: &WorkflowStep) -> Result<(), StorageError>;
    async fn list_for_execution(&self, execution_id: Uuid) -> Result<Vec<WorkflowStep>, StorageError>;
    async fn get_by_key(&self, execution_id: Uuid, step_key: &str) -> Result<Option<WorkflowStep>, StorageError>;

    /// For every step in `execution_id` whose `dependsOn` contains
    /// `completed_key`, atomically decrement `blockedByCount` and, if it
    /// reaches zero and status is `pending`, transition to `ready`
    /// Two concurrent step
    /// completions must both observe consistent counts.
    async fn decrement_dependents(&self, execution_id: Uuid, completed_key: &str) -> Result<(), StorageError>;

    /// Returns up to `limit` steps with `status = ready`, atomically
    /// flipping them to `running` so concurrent processors do not
    /// double-execute.
    async fn get_ready_steps(&self, execution_id: Uuid, limit: usize) -> Result<Vec<WorkflowStep>, StorageError>;
}

#[async_trait]
pub trait WorkflowTriggerRepository: Send + Sync {
    async fn create(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowTrigger>, StorageError>;
    async fn update(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError>;
    async fn list_enabled(&self) -> Result<Vec<WorkflowTrigger>, StorageError>;
}
