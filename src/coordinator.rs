//! Composition root: wires every service to a concrete sqlite backend and
//! owns the background loops (spec.md §5).
//!
//! Grounded on the teacher's top-level `Coordinator`, which owns the same
//! shape — one `Arc` per service, a shared `CancellationToken`, and a
//! `run()`/graceful-shutdown pair — generalized from the teacher's fixed
//! swarm-of-substrates model to this crate's supervisor/spawn-controller/
//! workflow-engine trio.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::errors::WorkerError;
use crate::infrastructure::sqlite::{
    SqliteBlackboardStore, SqliteCheckpointStore, SqliteMailStore, SqliteProposalStore,
    SqliteSpawnRequestRepository, SqliteWorkerRepository, SqliteWorkflowDefinitionRepository,
    SqliteWorkflowExecutionRepository, SqliteWorkflowStepRepository, SqliteWorkflowTriggerRepository,
};
use crate::services::spawn_controller::SpawnControllerConfig as ControllerConfig;
use crate::services::workflow_engine::{SpawnStepRequest, WorkflowEngine};
use crate::services::{ConsensusService, EventBus, MailHandoffService, SpawnController, WorkerSupervisor};

/// Everything the binary needs to serve requests and run the background
/// loops, built once from a loaded `Config` and a connected pool.
pub struct Coordinator {
    pub supervisor: Arc<WorkerSupervisor>,
    pub spawn_controller: Arc<SpawnController>,
    pub workflow_engine: Arc<WorkflowEngine>,
    pub events: Arc<EventBus>,
    pub mail: Arc<MailHandoffService>,
    pub proposals: Arc<ConsensusService>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Builds every repository, service, and the spawn-controller <->
    /// workflow-engine callback bridge against `pool`. Does not start any
    /// background loop or touch storage beyond construction — call
    /// `recover_on_startup` and `run` separately.
    pub fn new(pool: sqlx::SqlitePool, config: &Config) -> Self {
        let worker_repo = Arc::new(SqliteWorkerRepository::new(pool.clone()));
        let checkpoint_store = Arc::new(SqliteCheckpointStore::new(pool.clone()));
        let mail_store = Arc::new(SqliteMailStore::new(pool.clone()));
        let spawn_repo = Arc::new(SqliteSpawnRequestRepository::new(pool.clone()));
        let workflow_defs = Arc::new(SqliteWorkflowDefinitionRepository::new(pool.clone()));
        let workflow_execs = Arc::new(SqliteWorkflowExecutionRepository::new(pool.clone()));
        let workflow_steps = Arc::new(SqliteWorkflowStepRepository::new(pool.clone()));
        let workflow_triggers = Arc::new(SqliteWorkflowTriggerRepository::new(pool.clone()));
        let blackboard_store = Arc::new(SqliteBlackboardStore::new(pool.clone()));
        let proposals = Arc::new(ConsensusService::new(Arc::new(SqliteProposalStore::new(pool))));

        let events = Arc::new(EventBus::new());
        let mail = Arc::new(MailHandoffService::new(mail_store.clone(), mail_store));

        let supervisor = Arc::new(WorkerSupervisor::new(
            worker_repo,
            checkpoint_store.clone(),
            mail.clone(),
            events.clone(),
            config.max_workers,
            config.spawn_controller.max_depth,
            config.fleet_url.clone(),
        ));

        let spawn_controller = Arc::new(SpawnController::new(
            spawn_repo,
            supervisor.clone(),
            events.clone(),
            ControllerConfig {
                soft_limit: config.spawn_controller.soft_limit,
                hard_limit: config.spawn_controller.hard_limit,
                max_depth: config.spawn_controller.max_depth,
                process_interval: Duration::from_millis(config.spawn_controller.process_interval_ms),
            },
        ));

        let workflow_engine = Arc::new(
            WorkflowEngine::new(
                workflow_defs,
                workflow_execs,
                workflow_steps,
                workflow_triggers,
                blackboard_store,
                checkpoint_store,
                mail_store_as_handoffs(&mail),
                events.clone(),
                config.workflow.max_concurrent_steps,
                Duration::from_millis(config.workflow.process_interval_ms),
            )
            .with_spawn_callback(spawn_callback(spawn_controller.clone())),
        );

        Self {
            supervisor,
            spawn_controller,
            workflow_engine,
            events,
            mail,
            proposals,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reconciles persisted worker state with the fact that no subprocess
    /// from a previous run is still alive. Must run once before `run`.
    pub async fn recover_on_startup(&self) -> Result<usize, WorkerError> {
        self.supervisor.recover_on_startup().await
    }

    /// Spawns the health-check, spawn-drain, and workflow loops as
    /// background tasks sharing one cancellation token, returning
    /// immediately. Call `shutdown` to stop them.
    pub fn run(&self) {
        let token = self.shutdown.clone();
        tokio::spawn(self.supervisor.clone().run_health_loop(token.clone()));
        tokio::spawn(self.spawn_controller.clone().run_drain_loop(token.clone()));
        tokio::spawn(self.workflow_engine.clone().run_processing_loop(token.clone()));
        tokio::spawn(self.workflow_engine.clone().run_trigger_loop(token));
    }

    /// Cancels the background loops and dismisses every tracked worker.
    pub async fn shutdown(&self) -> Result<usize, WorkerError> {
        self.shutdown.cancel();
        self.supervisor.dismiss_all().await
    }
}

/// `SqliteMailStore` implements both `MailStore` and `HandoffStore`; the
/// workflow engine only needs the latter, reached through the same `Arc`
/// the mail service already holds rather than a second pool handle.
fn mail_store_as_handoffs(
    mail: &Arc<MailHandoffService>,
) -> Arc<dyn crate::domain::ports::HandoffStore> {
    mail.handoff_store()
}

fn spawn_callback(controller: Arc<SpawnController>) -> crate::services::workflow_engine::SpawnCallback {
    Arc::new(move |request: SpawnStepRequest| {
        let controller = controller.clone();
        Box::pin(async move {
            let request_record = controller
                .enqueue(
                    "workflow-engine".to_string(),
                    request.agent_role,
                    0,
                    request.swarm_id,
                    crate::domain::models::Priority::Normal,
                    crate::domain::models::SpawnPayload { task: request.task, context: None, checkpoint: None },
                    std::collections::HashSet::new(),
                )
                .await
                .map_err(|e| e.to_string())?;
            Ok(request_record.id)
        })
    })
}
