//! Blackboard store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{BlackboardMessage, BlackboardQuery, Priority};

#[async_trait]
pub trait BlackboardStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn post(
        &self,
        swarm_id: &str,
        sender: &str,
        message_type: &str,
        payload: serde_json::Value,
        target: Option<&str>,
        priority: Priority,
    ) -> Result<Uuid, StorageError>;

    async fn read(&self, swarm_id: &str, query: &BlackboardQuery) -> Result<Vec<BlackboardMessage>, StorageError>;

    /// Idempotent: adds `reader_handle` to each message's `readBy` set if absent.
    async fn mark_read(&self, message_ids: &[Uuid], reader_handle: &str) -> Result<(), StorageError>;

    async fn archive(&self, message_ids: &[Uuid]) -> Result<(), StorageError>;

    /// Archives everything in `swarm_id` with `created_at < cutoff`.
    async fn archive_old(&self, swarm_id: &str, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}
