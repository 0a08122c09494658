//! Workflow domain models: definitions, executions, steps, and triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Type of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Task,
    Spawn,
    Checkpoint,
    Gate,
    Parallel,
    Script,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Spawn => "spawn",
            Self::Checkpoint => "checkpoint",
            Self::Gate => "gate",
            Self::Parallel => "parallel",
            Self::Script => "script",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "spawn" => Some(Self::Spawn),
            "checkpoint" => Some(Self::Checkpoint),
            "gate" => Some(Self::Gate),
            "parallel" => Some(Self::Parallel),
            "script" => Some(Self::Script),
            _ => None,
        }
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Fail,
    Skip,
    Retry,
    Continue,
}

impl Default for OnFailure {
    fn default() -> Self {
        Self::Fail
    }
}

impl OnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Retry => "retry",
            Self::Continue => "continue",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "fail" => Some(Self::Fail),
            "skip" => Some(Self::Skip),
            "retry" => Some(Self::Retry),
            "continue" => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Static definition of one step within a `WorkflowDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub key: String,
    pub step_type: StepType,
    pub depends_on: Vec<String>,
    pub config: serde_json::Value,
    pub guard: Option<String>,
    pub on_failure: OnFailure,
    pub max_retries: u32,
    pub timeout_ms: Option<u64>,
}

/// The static graph of steps making up a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinitionBody {
    pub steps: Vec<StepDefinition>,
    pub inputs: Option<HashMap<String, InputSpec>>,
    pub outputs: Option<HashMap<String, String>>,
}

/// Declared input with an optional default and required flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub definition: WorkflowDefinitionBody,
    pub is_template: bool,
}

impl WorkflowDefinition {
    /// Validates that `(steps, dependsOn)` forms a DAG and every referenced
    /// key exists.
    pub fn validate(&self) -> Result<(), String> {
        let keys: HashSet<&str> = self.definition.steps.iter().map(|s| s.key.as_str()).collect();
        if keys.len() != self.definition.steps.len() {
            return Err("duplicate step key".to_string());
        }
        for step in &self.definition.steps {
            for dep in &step.depends_on {
                if !keys.contains(dep.as_str()) {
                    return Err(format!("unknown step key referenced: {dep}"));
                }
            }
        }
        // Kahn's algorithm to detect cycles.
        let mut indegree: HashMap<&str, usize> = keys.iter().map(|k| (*k, 0)).collect();
        for step in &self.definition.steps {
            *indegree.get_mut(step.key.as_str()).unwrap() += step.depends_on.len();
        }
        let mut queue: Vec<&str> = indegree
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut visited = 0usize;
        let dependents: HashMap<&str, Vec<&str>> = {
            let mut m: HashMap<&str, Vec<&str>> = HashMap::new();
            for step in &self.definition.steps {
                for dep in &step.depends_on {
                    m.entry(dep.as_str()).or_default().push(step.key.as_str());
                }
            }
            m
        };
        while let Some(key) = queue.pop() {
            visited += 1;
            if let Some(deps) = dependents.get(key) {
                for &d in deps {
                    let entry = indegree.get_mut(d).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push(d);
                    }
                }
            }
        }
        if visited != self.definition.steps.len() {
            return Err("definition is not a DAG: cycle detected".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub swarm_id: Option<String>,
    pub status: ExecutionStatus,
    pub context: serde_json::Value,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    Blocked,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Dependencies count as satisfied once `completed` or `skipped`.
    pub const fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Execution-instance step, cloned from a `StepDefinition` at start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_key: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub config: serde_json::Value,
    pub guard: Option<String>,
    pub depends_on: Vec<String>,
    pub blocked_by_count: u32,
    pub on_failure: OnFailure,
    pub output: Option<serde_json::Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowStep {
    pub fn from_definition(execution_id: Uuid, def: &StepDefinition, now: DateTime<Utc>) -> Self {
        let _ = now;
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_key: def.key.clone(),
            step_type: def.step_type,
            status: StepStatus::Pending,
            config: def.config.clone(),
            guard: def.guard.clone(),
            depends_on: def.depends_on.clone(),
            blocked_by_count: def.depends_on.len() as u32,
            on_failure: def.on_failure,
            output: None,
            retry_count: 0,
            max_retries: def.max_retries,
            timeout_ms: def.timeout_ms,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// A `pending` step with `blockedByCount = 0` is eligible to transition to `ready`
    /// Used when a dependency completes to re-derive readiness.
    pub const fn is_eligible(&self) -> bool {
        matches!(self.status, StepStatus::Pending) && self.blocked_by_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    Schedule,
    Webhook,
    Blackboard,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Blackboard => "blackboard",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Self::Event),
            "schedule" => Some(Self::Schedule),
            "webhook" => Some(Self::Webhook),
            "blackboard" => Some(Self::Blackboard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub config: serde_json::Value,
    pub is_enabled: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
}
