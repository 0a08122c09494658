//! SpawnRequest domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Admission priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnRequestStatus {
    Pending,
    Approved,
    Rejected,
    Spawned,
}

impl SpawnRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Spawned => "spawned",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "spawned" => Some(Self::Spawned),
            _ => None,
        }
    }

    /// Terminal states are `rejected` and `spawned`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Spawned)
    }
}

/// Task + optional context/checkpoint carried by a spawn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnPayload {
    pub task: String,
    pub context: Option<serde_json::Value>,
    pub checkpoint: Option<serde_json::Value>,
}

/// A queued request to spawn a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub id: Uuid,
    pub requester_handle: String,
    pub target_agent_type: String,
    pub depth_level: u32,
    pub swarm_id: Option<String>,
    pub priority: Priority,
    pub status: SpawnRequestStatus,
    pub payload: SpawnPayload,
    pub depends_on: HashSet<Uuid>,
    pub blocked_by_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub spawned_worker_id: Option<Uuid>,
}

impl SpawnRequest {
    /// `blockedByCount = |{d in dependsOn : status(d) != spawned}|`.
    pub fn compute_blocked_by_count(
        depends_on: &HashSet<Uuid>,
        dependency_statuses: &std::collections::HashMap<Uuid, SpawnRequestStatus>,
    ) -> u32 {
        depends_on
            .iter()
            .filter(|d| dependency_statuses.get(d) != Some(&SpawnRequestStatus::Spawned))
            .count() as u32
    }
}
