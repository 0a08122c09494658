//! Swarm-intelligence input types (spec.md §4.9).
//!
//! Storage for these rows is plain CRUD and explicitly out of scope
//! (spec.md §1) apart from the one atomic operation the persistence
//! contract calls out by name: `upsertVote` (spec.md §4.1). `Proposal` is
//! the thin persisted record that operation needs; everything else here
//! stays a plain calculator input shape with no port of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    Majority,
    Supermajority,
    Unanimous,
    Ranked,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumType {
    None,
    Absolute,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_handle: String,
    /// An option name for non-ranked methods, or a JSON-encoded list of
    /// option names (a ranking) for `VotingMethod::Ranked`.
    pub vote_value: String,
    pub vote_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusProposal {
    pub options: Vec<String>,
    pub voting_method: VotingMethod,
    pub quorum_type: QuorumType,
    pub quorum_value: f64,
    pub votes: Vec<Vote>,
}

/// Persisted proposal row, as distinct from `ConsensusProposal`: the
/// latter is the in-memory shape `tally_votes` consumes, assembled by the
/// caller from this record plus its votes (`ProposalStore::list_votes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub swarm_id: String,
    pub options: Vec<String>,
    pub voting_method: VotingMethod,
    pub quorum_type: QuorumType,
    pub quorum_value: f64,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Assembles the calculator input from this record and its votes.
    pub fn with_votes(&self, votes: Vec<Vote>) -> ConsensusProposal {
        ConsensusProposal {
            options: self.options.clone(),
            voting_method: self.voting_method,
            quorum_type: self.quorum_type,
            quorum_value: self.quorum_value,
            votes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyResult {
    pub tally: std::collections::BTreeMap<String, f64>,
    pub total_weight: f64,
    pub winner: Option<String>,
    pub quorum_met: bool,
    pub threshold_met: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PheromoneTrail {
    pub intensity: f64,
    pub decay_rate_per_hour: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusCondition {
    pub satisfied: bool,
    pub bonus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoffContract {
    pub base_value: f64,
    pub multiplier: f64,
    pub decay_rate: f64,
    pub deadline: DateTime<Utc>,
    pub bonus_conditions: Vec<BonusCondition>,
}
