//! Checkpoint store port. Append-only — no update method.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::Checkpoint;

#[derive(Debug, Clone, Default)]
pub struct CheckpointListOptions {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    async fn get_latest(&self, worker_handle: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// Reverse chronological order.
    async fn list(&self, worker_handle: &str, options: &CheckpointListOptions) -> Result<Vec<Checkpoint>, StorageError>;

    /// Deletes all but the `keep_n` most-recent rows for `worker_handle`;
    /// returns the number removed.
    async fn cleanup(&self, worker_handle: &str, keep_n: usize) -> Result<usize, StorageError>;
}
