//! In-memory persistence backend.
//!
//! Implements every port in `domain::ports` behind `Arc<Mutex<..>>` state.
//! Used by the integration test suite and as a reference "second backend"
//! demonstrating that the core depends only on the port traits, never on
//! `sqlx` directly ("class inheritance maps to an interface per
//! entity family; the polymorphism set is the atomic multi-row operations").
//!
//! Atomicity for the multi-row operations is provided by holding the
//! `std::sync::Mutex` for the whole operation — the in-memory analogue of
//! the sqlite backend's `BEGIN IMMEDIATE` transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::*;
use crate::domain::ports::*;

#[derive(Default)]
struct Tables {
    workers: HashMap<Uuid, Worker>,
    spawn_requests: HashMap<Uuid, SpawnRequest>,
    mail: HashMap<Uuid, MailMessage>,
    handoffs: HashMap<Uuid, Handoff>,
    checkpoints: HashMap<Uuid, Checkpoint>,
    blackboard: HashMap<Uuid, BlackboardMessage>,
    workflow_definitions: HashMap<Uuid, WorkflowDefinition>,
    workflow_executions: HashMap<Uuid, WorkflowExecution>,
    workflow_steps: HashMap<Uuid, WorkflowStep>,
    workflow_triggers: HashMap<Uuid, WorkflowTrigger>,
    proposals: HashMap<Uuid, Proposal>,
    votes: HashMap<(Uuid, String), Vote>,
}

/// A single process-wide in-memory store backing every port trait.
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryStore {
    async fn create(&self, worker: &Worker) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        if t.workers.contains_key(&worker.id) {
            return Err(StorageError::ConstraintViolation("worker id exists".into()));
        }
        t.workers.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>, StorageError> {
        Ok(self.tables.lock().unwrap().workers.get(&id).cloned())
    }

    async fn get_by_handle(&self, team_name: &str, handle: &str) -> Result<Option<Worker>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workers
            .values()
            .find(|w| w.team_name == team_name && w.handle == handle)
            .cloned())
    }

    async fn update(&self, worker: &Worker) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.workers
            .get_mut(&worker.id)
            .ok_or(StorageError::NotFound)
            .map(|slot| *slot = worker.clone())
    }

    async fn list(&self) -> Result<Vec<Worker>, StorageError> {
        Ok(self.tables.lock().unwrap().workers.values().cloned().collect())
    }

    async fn list_non_dismissed(&self) -> Result<Vec<Worker>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dismissed)
            .cloned()
            .collect())
    }

    async fn count_non_dismissed(&self) -> Result<usize, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dismissed)
            .count())
    }

    async fn list_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SpawnRequestRepository for InMemoryStore {
    async fn create(&self, request: &SpawnRequest) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.spawn_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SpawnRequest>, StorageError> {
        Ok(self.tables.lock().unwrap().spawn_requests.get(&id).cloned())
    }

    async fn update(&self, request: &SpawnRequest) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.spawn_requests
            .get_mut(&request.id)
            .ok_or(StorageError::NotFound)
            .map(|slot| *slot = request.clone())
    }

    async fn list(&self) -> Result<Vec<SpawnRequest>, StorageError> {
        Ok(self.tables.lock().unwrap().spawn_requests.values().cloned().collect())
    }

    async fn list_drainable(&self) -> Result<Vec<SpawnRequest>, StorageError> {
        let t = self.tables.lock().unwrap();
        let mut rows: Vec<SpawnRequest> = t
            .spawn_requests
            .values()
            .filter(|r| r.status == SpawnRequestStatus::Pending && r.blocked_by_count == 0)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(rows)
    }

    async fn count_status(&self, status: SpawnRequestStatus) -> Result<usize, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .spawn_requests
            .values()
            .filter(|r| r.status == status)
            .count())
    }

    async fn decrement_dependents(&self, completed_id: Uuid) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        let dependents: Vec<Uuid> = t
            .spawn_requests
            .values()
            .filter(|r| r.depends_on.contains(&completed_id))
            .map(|r| r.id)
            .collect();
        for id in dependents {
            if let Some(r) = t.spawn_requests.get_mut(&id) {
                if r.blocked_by_count > 0 {
                    r.blocked_by_count -= 1;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MailStore for InMemoryStore {
    async fn send(&self, from: &str, to: &str, body: &str, subject: Option<&str>) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let msg = MailMessage {
            id,
            from_handle: from.to_string(),
            to_handle: to.to_string(),
            subject: subject.map(String::from),
            body: body.to_string(),
            read_at: None,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().mail.insert(id, msg);
        Ok(id)
    }

    async fn get_unread(&self, handle: &str) -> Result<Vec<MailMessage>, StorageError> {
        let t = self.tables.lock().unwrap();
        let mut rows: Vec<MailMessage> = t
            .mail
            .values()
            .filter(|m| m.to_handle == handle && m.read_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn mark_read(&self, mail_id: Uuid) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(m) = t.mail.get_mut(&mail_id) {
            if m.read_at.is_none() {
                m.read_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HandoffStore for InMemoryStore {
    async fn create(&self, handoff: &Handoff) -> Result<(), StorageError> {
        self.tables.lock().unwrap().handoffs.insert(handoff.id, handoff.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Handoff>, StorageError> {
        Ok(self.tables.lock().unwrap().handoffs.get(&id).cloned())
    }

    async fn get_pending(&self, handle: &str) -> Result<Vec<Handoff>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .handoffs
            .values()
            .filter(|h| h.to_handle == handle && h.status == HandoffStatus::Pending)
            .cloned()
            .collect())
    }

    async fn accept(&self, id: Uuid, accepted_at: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut t = self.tables.lock().unwrap();
        match t.handoffs.get_mut(&id) {
            Some(h) if h.status == HandoffStatus::Pending => {
                h.status = HandoffStatus::Accepted;
                h.accepted_at = Some(accepted_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound),
        }
    }

    async fn reject(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut t = self.tables.lock().unwrap();
        match t.handoffs.get_mut(&id) {
            Some(h) if h.status == HandoffStatus::Pending => {
                h.status = HandoffStatus::Rejected;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.tables.lock().unwrap().checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn get_latest(&self, worker_handle: &str) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .checkpoints
            .values()
            .filter(|c| c.worker_handle == worker_handle)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list(&self, worker_handle: &str, options: &CheckpointListOptions) -> Result<Vec<Checkpoint>, StorageError> {
        let t = self.tables.lock().unwrap();
        let mut rows: Vec<Checkpoint> = t
            .checkpoints
            .values()
            .filter(|c| c.worker_handle == worker_handle)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn cleanup(&self, worker_handle: &str, keep_n: usize) -> Result<usize, StorageError> {
        let mut t = self.tables.lock().unwrap();
        let mut rows: Vec<Checkpoint> = t
            .checkpoints
            .values()
            .filter(|c| c.worker_handle == worker_handle)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let to_remove: Vec<Uuid> = rows.into_iter().skip(keep_n).map(|c| c.id).collect();
        let removed = to_remove.len();
        for id in to_remove {
            t.checkpoints.remove(&id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl BlackboardStore for InMemoryStore {
    async fn post(
        &self,
        swarm_id: &str,
        sender: &str,
        message_type: &str,
        payload: serde_json::Value,
        target: Option<&str>,
        priority: Priority,
    ) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let msg = BlackboardMessage {
            id,
            swarm_id: swarm_id.to_string(),
            sender_handle: sender.to_string(),
            message_type: message_type.to_string(),
            target_handle: target.map(String::from),
            priority,
            payload,
            read_by: Default::default(),
            created_at: Utc::now(),
            archived_at: None,
        };
        self.tables.lock().unwrap().blackboard.insert(id, msg);
        Ok(id)
    }

    async fn read(&self, swarm_id: &str, query: &BlackboardQuery) -> Result<Vec<BlackboardMessage>, StorageError> {
        let t = self.tables.lock().unwrap();
        let mut rows: Vec<BlackboardMessage> = t
            .blackboard
            .values()
            .filter(|m| m.swarm_id == swarm_id && m.archived_at.is_none())
            .filter(|m| query.message_type.as_deref().map_or(true, |mt| m.message_type == mt))
            .filter(|m| query.priority.map_or(true, |p| m.priority == p))
            .filter(|m| {
                if query.unread_only {
                    query
                        .reader_handle
                        .as_deref()
                        .map(|r| !m.read_by.contains(r))
                        .unwrap_or(true)
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        rows.truncate(query.effective_limit());
        Ok(rows)
    }

    async fn mark_read(&self, message_ids: &[Uuid], reader_handle: &str) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        for id in message_ids {
            if let Some(m) = t.blackboard.get_mut(id) {
                m.read_by.insert(reader_handle.to_string());
            }
        }
        Ok(())
    }

    async fn archive(&self, message_ids: &[Uuid]) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        let now = Utc::now();
        for id in message_ids {
            if let Some(m) = t.blackboard.get_mut(id) {
                m.archived_at = Some(now);
            }
        }
        Ok(())
    }

    async fn archive_old(&self, swarm_id: &str, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut t = self.tables.lock().unwrap();
        let mut count = 0;
        for m in t.blackboard.values_mut() {
            if m.swarm_id == swarm_id && m.archived_at.is_none() && m.created_at < cutoff {
                m.archived_at = Some(Utc::now());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl WorkflowDefinitionRepository for InMemoryStore {
    async fn create(&self, definition: &WorkflowDefinition) -> Result<(), StorageError> {
        self.tables
            .lock()
            .unwrap()
            .workflow_definitions
            .insert(definition.id, definition.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StorageError> {
        Ok(self.tables.lock().unwrap().workflow_definitions.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<WorkflowDefinition>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workflow_definitions
            .values()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, StorageError> {
        Ok(self.tables.lock().unwrap().workflow_definitions.values().cloned().collect())
    }
}

#[async_trait]
impl WorkflowExecutionRepository for InMemoryStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), StorageError> {
        self.tables
            .lock()
            .unwrap()
            .workflow_executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StorageError> {
        Ok(self.tables.lock().unwrap().workflow_executions.get(&id).cloned())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.workflow_executions
            .get_mut(&execution.id)
            .ok_or(StorageError::NotFound)
            .map(|slot| *slot = execution.clone())
    }

    async fn list_running(&self) -> Result<Vec<WorkflowExecution>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workflow_executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowStepRepository for InMemoryStore {
    async fn create(&self, step: &WorkflowStep) -> Result<(), StorageError> {
        self.tables.lock().unwrap().workflow_steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowStep>, StorageError> {
        Ok(self.tables.lock().unwrap().workflow_steps.get(&id).cloned())
    }

    async fn update(&self, step: &WorkflowStep) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.workflow_steps
            .get_mut(&step.id)
            .ok_or(StorageError::NotFound)
            .map(|slot| *slot = step.clone())
    }

    async fn list_for_execution(&self, execution_id: Uuid) -> Result<Vec<WorkflowStep>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workflow_steps
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn get_by_key(&self, execution_id: Uuid, step_key: &str) -> Result<Option<WorkflowStep>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workflow_steps
            .values()
            .find(|s| s.execution_id == execution_id && s.step_key == step_key)
            .cloned())
    }

    async fn decrement_dependents(&self, execution_id: Uuid, completed_key: &str) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        let ids: Vec<Uuid> = t
            .workflow_steps
            .values()
            .filter(|s| s.execution_id == execution_id && s.depends_on.iter().any(|d| d == completed_key))
            .map(|s| s.id)
            .collect();
        for id in ids {
            if let Some(s) = t.workflow_steps.get_mut(&id) {
                if s.blocked_by_count > 0 {
                    s.blocked_by_count -= 1;
                }
                if s.blocked_by_count == 0 && s.status == StepStatus::Pending {
                    s.status = StepStatus::Ready;
                }
            }
        }
        Ok(())
    }

    async fn get_ready_steps(&self, execution_id: Uuid, limit: usize) -> Result<Vec<WorkflowStep>, StorageError> {
        let mut t = self.tables.lock().unwrap();
        let ids: Vec<Uuid> = t
            .workflow_steps
            .values()
            .filter(|s| s.execution_id == execution_id && s.status == StepStatus::Ready)
            .take(limit)
            .map(|s| s.id)
            .collect();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(s) = t.workflow_steps.get_mut(&id) {
                s.status = StepStatus::Running;
                s.started_at = Some(Utc::now());
                claimed.push(s.clone());
            }
        }
        Ok(claimed)
    }
}

#[async_trait]
impl WorkflowTriggerRepository for InMemoryStore {
    async fn create(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError> {
        self.tables.lock().unwrap().workflow_triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowTrigger>, StorageError> {
        Ok(self.tables.lock().unwrap().workflow_triggers.get(&id).cloned())
    }

    async fn update(&self, trigger: &WorkflowTrigger) -> Result<(), StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.workflow_triggers
            .get_mut(&trigger.id)
            .ok_or(StorageError::NotFound)
            .map(|slot| *slot = trigger.clone())
    }

    async fn list_enabled(&self) -> Result<Vec<WorkflowTrigger>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .workflow_triggers
            .values()
            .filter(|t| t.is_enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProposalStore for InMemoryStore {
    async fn create(&self, proposal: &Proposal) -> Result<(), StorageError> {
        self.tables.lock().unwrap().proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Proposal>, StorageError> {
        Ok(self.tables.lock().unwrap().proposals.get(&id).cloned())
    }

    async fn list(&self, swarm_id: &str) -> Result<Vec<Proposal>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .proposals
            .values()
            .filter(|p| p.swarm_id == swarm_id)
            .cloned()
            .collect())
    }

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .votes
            .iter()
            .filter(|((pid, _), _)| *pid == proposal_id)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn upsert_vote(&self, proposal_id: Uuid, vote: Vote) -> Result<Vote, StorageError> {
        let mut t = self.tables.lock().unwrap();
        t.votes.insert((proposal_id, vote.voter_handle.clone()), vote.clone());
        Ok(vote)
    }
}
