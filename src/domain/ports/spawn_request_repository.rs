//! Spawn request repository port: persistence for queued spawn requests
//! awaiting admission control.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{SpawnRequest, SpawnRequestStatus};

#[async_trait]
pub trait SpawnRequestRepository: Send + Sync {
    async fn create(&self, request: &SpawnRequest) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<SpawnRequest>, StorageError>;
    async fn update(&self, request: &SpawnRequest) -> Result<(), StorageError>;
    async fn list(&self) -> Result<Vec<SpawnRequest>, StorageError>;

    /// Requests with `blockedByCount = 0, status = pending`, ordered by
    /// `(priority desc, createdAt asc)` as the drain loop requires.
    async fn list_drainable(&self) -> Result<Vec<SpawnRequest>, StorageError>;

    async fn count_status(&self, status: SpawnRequestStatus) -> Result<usize, StorageError>;

    /// For every request whose `dependsOn` contains `completed_id` in this
    /// population, atomically decrement `blockedByCount` and, if it reaches
    /// zero and status is `pending`, leave it eligible for the next drain
    /// pass.
    async fn decrement_dependents(&self, completed_id: Uuid) -> Result<(), StorageError>;
}
