//! BlackboardMessage domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::spawn_request::Priority;

/// A swarm-scoped typed message on the blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardMessage {
    pub id: Uuid,
    pub swarm_id: String,
    pub sender_handle: String,
    pub message_type: String,
    /// `None` means broadcast to the whole swarm.
    pub target_handle: Option<String>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub read_by: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Query parameters for `Blackboard::read`.
#[derive(Debug, Clone, Default)]
pub struct BlackboardQuery {
    pub message_type: Option<String>,
    pub priority: Option<Priority>,
    pub unread_only: bool,
    pub reader_handle: Option<String>,
    pub limit: Option<usize>,
}

/// Default read limit and hard ceiling.
pub const DEFAULT_READ_LIMIT: usize = 50;
pub const MAX_READ_LIMIT: usize = 1000;

impl BlackboardQuery {
    /// Limit clamped to `[1, MAX_READ_LIMIT]`, defaulting to `DEFAULT_READ_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_READ_LIMIT).min(MAX_READ_LIMIT)
    }
}
