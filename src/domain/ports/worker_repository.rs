//! Worker repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Worker, WorkerStatus};

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create(&self, worker: &Worker) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<Worker>, StorageError>;
    async fn get_by_handle(&self, team_name: &str, handle: &str) -> Result<Option<Worker>, StorageError>;
    async fn update(&self, worker: &Worker) -> Result<(), StorageError>;
    async fn list(&self) -> Result<Vec<Worker>, StorageError>;

    /// Workers whose status is not `dismissed` — consulted for handle-uniqueness
    /// checks and the hard/soft spawn caps, and reloaded on supervisor startup
    /// as the "recoverable" set on supervisor restart.
    async fn list_non_dismissed(&self) -> Result<Vec<Worker>, StorageError>;

    async fn count_non_dismissed(&self) -> Result<usize, StorageError>;

    async fn list_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>, StorageError>;
}
