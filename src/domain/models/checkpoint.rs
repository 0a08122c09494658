//! Checkpoint domain model. Append-only: no updates after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub worker_handle: String,
    pub goal: String,
    pub now: String,
    pub test: Option<String>,
    pub done_this_session: Vec<String>,
    pub blockers: Vec<String>,
    pub questions: Vec<String>,
    pub next: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Renders the fixed Markdown shape used when respawning a worker.
pub fn format_for_resume(record: &Checkpoint) -> String {
    fn bullets_or_none(items: &[String]) -> String {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
        }
    }

    format!(
        "## Checkpoint Resume\nGoal: {}\nNow: {}\n### Completed:\n{}\n### Remaining:\n{}",
        record.goal,
        record.now,
        bullets_or_none(&record.done_this_session),
        bullets_or_none(&record.next),
    )
}
