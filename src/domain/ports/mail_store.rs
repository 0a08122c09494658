//! Mail and handoff store ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Handoff, MailMessage};

#[async_trait]
pub trait MailStore: Send + Sync {
    async fn send(&self, from: &str, to: &str, body: &str, subject: Option<&str>) -> Result<Uuid, StorageError>;

    /// Unread messages for `handle`, ordered by `createdAt` ascending.
    async fn get_unread(&self, handle: &str) -> Result<Vec<MailMessage>, StorageError>;

    /// Idempotent; a second call on an already-read message is a no-op.
    async fn mark_read(&self, mail_id: Uuid) -> Result<(), StorageError>;
}

#[async_trait]
pub trait HandoffStore: Send + Sync {
    async fn create(&self, handoff: &Handoff) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<Handoff>, StorageError>;

    /// Handoffs addressed to `handle` still awaiting acceptance.
    async fn get_pending(&self, handle: &str) -> Result<Vec<Handoff>, StorageError>;

    /// Returns `false` without side effect if the handoff was not `pending`
    /// (the one-way `pending -> accepted` transition already fired).
    async fn accept(&self, id: Uuid, accepted_at: DateTime<Utc>) -> Result<bool, StorageError>;

    async fn reject(&self, id: Uuid) -> Result<bool, StorageError>;
}
