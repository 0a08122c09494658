//! Domain models for the fleet coordinator core.

pub mod blackboard;
pub mod checkpoint;
pub mod handoff;
pub mod mail;
pub mod spawn_request;
pub mod swarm_intel;
pub mod worker;
pub mod workflow;

pub use blackboard::{BlackboardMessage, BlackboardQuery, DEFAULT_READ_LIMIT, MAX_READ_LIMIT};
pub use checkpoint::{format_for_resume, Checkpoint};
pub use handoff::{Handoff, HandoffStatus};
pub use mail::MailMessage;
pub use spawn_request::{Priority, SpawnPayload, SpawnRequest, SpawnRequestStatus};
pub use swarm_intel::{
    BonusCondition, ConsensusProposal, PayoffContract, PheromoneTrail, Proposal, QuorumType, TallyResult, Vote,
    VotingMethod,
};
pub use worker::{OutputLine, SpawnConfig, Worker, WorkerEvent, WorkerHealth, WorkerRole, WorkerStatus};
pub use workflow::{
    ExecutionStatus, InputSpec, OnFailure, StepDefinition, StepStatus, StepType, TriggerType,
    WorkflowDefinition, WorkflowDefinitionBody, WorkflowExecution, WorkflowStep, WorkflowTrigger,
};
