//! Core services: the stateful orchestration logic above the persistence
//! ports and below any transport.

pub mod event_bus;
pub mod expr;
pub mod mail_handoff;
pub mod spawn_controller;
pub mod swarm_intel;
pub mod worker_supervisor;
pub mod workflow_engine;

pub use event_bus::EventBus;
pub use mail_handoff::MailHandoffService;
pub use spawn_controller::{SpawnController, SpawnControllerConfig};
pub use swarm_intel::ConsensusService;
pub use worker_supervisor::WorkerSupervisor;
pub use workflow_engine::WorkflowEngine;
