//! Worker domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role a worker was spawned to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Coordinator,
    Worker,
    Monitor,
    Notifier,
    Merger,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
            Self::Monitor => "monitor",
            Self::Notifier => "notifier",
            Self::Merger => "merger",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coordinator" => Some(Self::Coordinator),
            "worker" => Some(Self::Worker),
            "monitor" => Some(Self::Monitor),
            "notifier" => Some(Self::Notifier),
            "merger" => Some(Self::Merger),
            _ => None,
        }
    }
}

/// Lifecycle status of a worker (persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Ready,
    Busy,
    Error,
    Dismissed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "busy" => Some(Self::Busy),
            "error" => Some(Self::Error),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Dismissed)
    }
}

/// Derived, in-memory health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A managed subprocess worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub handle: String,
    pub team_name: String,
    pub role: WorkerRole,
    pub status: WorkerStatus,
    pub swarm_id: Option<String>,
    pub depth_level: u32,
    pub session_id: Option<String>,
    pub restart_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub initial_prompt: Option<String>,
    pub worktree_path: Option<String>,
    pub worktree_branch: Option<String>,
    /// Whether the health checker may dismiss+respawn this worker when it
    /// goes `unhealthy` (spec.md §4.5, S6). Set once at spawn time from
    /// `SpawnConfig::auto_restart` and otherwise untouched.
    pub auto_restart: bool,
    pub created_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

/// Configuration accepted by `WorkerSupervisor::spawn`.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub handle: String,
    pub team_name: String,
    pub role: WorkerRole,
    pub swarm_id: Option<String>,
    pub depth_level: u32,
    pub session_id: Option<String>,
    pub initial_prompt: Option<String>,
    pub worktree_path: Option<String>,
    pub worktree_branch: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub auto_restart: bool,
}

impl Worker {
    pub fn new(id: Uuid, config: &SpawnConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            handle: config.handle.clone(),
            team_name: config.team_name.clone(),
            role: config.role,
            status: WorkerStatus::Pending,
            swarm_id: config.swarm_id.clone(),
            depth_level: config.depth_level,
            session_id: config.session_id.clone(),
            restart_count: 0,
            last_heartbeat: None,
            initial_prompt: config.initial_prompt.clone(),
            worktree_path: config.worktree_path.clone(),
            worktree_branch: config.worktree_branch.clone(),
            auto_restart: config.auto_restart,
            created_at: now,
            dismissed_at: None,
        }
    }
}

/// A single line emitted by a worker, held in the per-worker output ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: WorkerEvent,
}

/// The stdout event-stream schema emitted by worker subprocesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    System {
        subtype: String,
        session_id: Option<String>,
    },
    Assistant {
        subtype: String,
        message: Option<serde_json::Value>,
    },
    User {
        message: Option<serde_json::Value>,
    },
    Result {
        duration_ms: Option<u64>,
        total_cost_usd: Option<f64>,
        is_error: bool,
    },
}
