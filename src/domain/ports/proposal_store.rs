//! Consensus proposal store port (spec.md §4.1, §4.9).
//!
//! Storage for swarm-intel rows is plain CRUD and out of scope (spec.md
//! §1); the one exception is `upsert_vote`, named explicitly in the
//! persistence contract's list of required atomic operations — a voter
//! casting a second ballot replaces their first rather than accumulating
//! two rows for the same `(proposal_id, voter_handle)`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Proposal, Vote};

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn create(&self, proposal: &Proposal) -> Result<(), StorageError>;
    async fn get(&self, id: Uuid) -> Result<Option<Proposal>, StorageError>;
    async fn list(&self, swarm_id: &str) -> Result<Vec<Proposal>, StorageError>;

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StorageError>;

    /// Insert-or-replace semantics keyed on `(proposal_id, voter_handle)`;
    /// returns the post-upsert row.
    async fn upsert_vote(&self, proposal_id: Uuid, vote: Vote) -> Result<Vote, StorageError>;
}
