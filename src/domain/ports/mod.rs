//! Persistence contract: one interface per entity family,
//! plus the atomic multi-row operations correctness depends on.

pub mod blackboard_store;
pub mod checkpoint_store;
pub mod mail_store;
pub mod proposal_store;
pub mod spawn_request_repository;
pub mod worker_repository;
pub mod workflow_repository;

pub use blackboard_store::BlackboardStore;
pub use checkpoint_store::{CheckpointListOptions, CheckpointStore};
pub use mail_store::{HandoffStore, MailStore};
pub use proposal_store::ProposalStore;
pub use spawn_request_repository::SpawnRequestRepository;
pub use worker_repository::WorkerRepository;
pub use workflow_repository::{
    WorkflowDefinitionRepository, WorkflowExecutionRepository, WorkflowStepRepository,
    WorkflowTriggerRepository,
};
