//! SQLite persistence backend: one adapter module per port, sharing a pool.

pub mod blackboard_store;
pub mod checkpoint_store;
pub mod connection;
pub mod mail_store;
pub mod migrations;
pub mod proposal_store;
pub mod spawn_request_repository;
pub mod worker_repository;
pub mod workflow_repository;

pub use blackboard_store::SqliteBlackboardStore;
pub use checkpoint_store::SqliteCheckpointStore;
pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use mail_store::SqliteMailStore;
pub use migrations::{all_embedded_migrations, MigrationError, Migrator};
pub use proposal_store::SqliteProposalStore;
pub use spawn_request_repository::SqliteSpawnRequestRepository;
pub use worker_repository::SqliteWorkerRepository;
pub use workflow_repository::{
    SqliteWorkflowDefinitionRepository, SqliteWorkflowExecutionRepository, SqliteWorkflowStepRepository,
    SqliteWorkflowTriggerRepository,
};
