//! Spawn controller: admission control and dependency-ordered draining of
//! spawn requests into live workers (spec.md §4.6).
//!
//! Grounded on the same "request queue + periodic drain" shape as the
//! worker supervisor's health loop, generalized with a priority/dependency
//! ordering. Holds only an `Arc<WorkerSupervisor>` — never the reverse —
//! so the two services compose without a cyclic dependency (spec.md §9).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::SpawnError;
use crate::domain::models::{Priority, SpawnConfig, SpawnPayload, SpawnRequest, SpawnRequestStatus, WorkerRole};
use crate::domain::ports::SpawnRequestRepository;
use crate::services::event_bus::{kinds, Event, EventBus, Topic};
use crate::services::worker_supervisor::WorkerSupervisor;

#[derive(Debug, Clone)]
pub struct SpawnControllerConfig {
    pub soft_limit: usize,
    pub hard_limit: usize,
    pub max_depth: u32,
    pub process_interval: Duration,
}

/// Admits and drains spawn requests. Enqueue, cancel, and drain share one
/// mutex so the drain loop always observes the freshest committed state
/// rather than racing a concurrent cancel (spec.md §4.6, §5).
pub struct SpawnController {
    repo: Arc<dyn SpawnRequestRepository>,
    supervisor: Arc<WorkerSupervisor>,
    events: Arc<EventBus>,
    config: SpawnControllerConfig,
    lock: AsyncMutex<()>,
}

impl SpawnController {
    pub fn new(
        repo: Arc<dyn SpawnRequestRepository>,
        supervisor: Arc<WorkerSupervisor>,
        events: Arc<EventBus>,
        config: SpawnControllerConfig,
    ) -> Self {
        Self { repo, supervisor, events, config, lock: AsyncMutex::new(()) }
    }

    /// Admits a spawn request. Rejects immediately (without ever becoming
    /// drainable) when the active population is already at the hard
    /// limit, the requested depth exceeds the configured maximum, or any
    /// declared dependency was itself rejected — in every other case the
    /// request is persisted `pending` with `blockedByCount` derived from
    /// its still-unresolved dependencies.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        requester_handle: String,
        target_agent_type: String,
        depth_level: u32,
        swarm_id: Option<String>,
        priority: Priority,
        payload: SpawnPayload,
        depends_on: HashSet<Uuid>,
    ) -> Result<SpawnRequest, SpawnError> {
        let _guard = self.lock.lock().await;

        let active = self.supervisor.active_worker_count().await?;
        let mut dependency_status: HashMap<Uuid, SpawnRequestStatus> = HashMap::new();
        for dep in &depends_on {
            if let Some(dependency) = self.repo.get(*dep).await? {
                dependency_status.insert(*dep, dependency.status);
            }
        }
        let dependency_rejected = dependency_status.values().any(|s| *s == SpawnRequestStatus::Rejected);

        let status = if active >= self.config.hard_limit || depth_level > self.config.max_depth || dependency_rejected {
            SpawnRequestStatus::Rejected
        } else {
            SpawnRequestStatus::Pending
        };

        let blocked_by_count = if status == SpawnRequestStatus::Rejected {
            0
        } else {
            SpawnRequest::compute_blocked_by_count(&depends_on, &dependency_status)
        };

        let request = SpawnRequest {
            id: Uuid::new_v4(),
            requester_handle,
            target_agent_type,
            depth_level,
            swarm_id,
            priority,
            status,
            payload,
            depends_on,
            blocked_by_count,
            created_at: Utc::now(),
            processed_at: if status == SpawnRequestStatus::Rejected { Some(Utc::now()) } else { None },
            spawned_worker_id: None,
        };
        self.repo.create(&request).await?;

        if status == SpawnRequestStatus::Rejected {
            self.repo.decrement_dependents(request.id).await?;
        }

        Ok(request)
    }

    /// Valid only while the request is still `pending`; transitions it to
    /// `rejected` and runs `decrementDependents`. Requests that already
    /// depend on it are *not* cancelled in turn — only their blocked count
    /// drops, same as any other resolved dependency.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, SpawnError> {
        let _guard = self.lock.lock().await;

        let Some(mut request) = self.repo.get(id).await? else {
            return Ok(false);
        };
        if request.status != SpawnRequestStatus::Pending {
            return Ok(false);
        }
        request.status = SpawnRequestStatus::Rejected;
        request.processed_at = Some(Utc::now());
        self.repo.update(&request).await?;
        self.repo.decrement_dependents(id).await?;
        Ok(true)
    }

    /// One drain pass: spawns drainable requests (`pending`,
    /// `blockedByCount == 0`) in `(priority desc, createdAt asc)` order
    /// until the soft limit is hit, then stops for this cycle.
    pub async fn drain_once(&self) -> Result<usize, SpawnError> {
        let _guard = self.lock.lock().await;

        let drainable = self.repo.list_drainable().await?;
        let mut spawned = 0;
        for request in drainable {
            let active = self.supervisor.active_worker_count().await?;
            if active >= self.config.soft_limit {
                break;
            }
            self.spawn_one(request).await?;
            spawned += 1;
        }
        Ok(spawned)
    }

    async fn spawn_one(&self, mut request: SpawnRequest) -> Result<(), SpawnError> {
        let role = WorkerRole::parse_str(&request.target_agent_type).unwrap_or(WorkerRole::Worker);
        let handle = format!("{}-{}", request.target_agent_type, &request.id.to_string()[..8]);
        let config = SpawnConfig {
            handle,
            team_name: request.requester_handle.clone(),
            role,
            swarm_id: request.swarm_id.clone(),
            depth_level: request.depth_level,
            session_id: None,
            initial_prompt: Some(request.payload.task.clone()),
            worktree_path: None,
            worktree_branch: None,
            command: "claude".to_string(),
            args: vec![],
            auto_restart: true,
        };

        let worker = self.supervisor.spawn(config).await.map_err(SpawnError::Worker)?;

        request.status = SpawnRequestStatus::Spawned;
        request.processed_at = Some(Utc::now());
        request.spawned_worker_id = Some(worker.id);
        self.repo.update(&request).await?;
        self.repo.decrement_dependents(request.id).await?;

        self.events.publish_broadcast(
            &Topic::Chat(request.requester_handle.clone()),
            Event::new(kinds::WORKER_SPAWNED, serde_json::json!({"handle": worker.handle, "requestId": request.id})),
        );
        Ok(())
    }

    /// Runs the drain loop until `token` is cancelled.
    pub async fn run_drain_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.process_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.drain_once().await {
                        tracing::warn!(%error, "spawn drain pass failed");
                    }
                }
            }
        }
    }
}
