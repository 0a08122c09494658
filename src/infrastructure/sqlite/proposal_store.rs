//! SQLite implementation of `ProposalStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::models::{Proposal, QuorumType, Vote, VotingMethod};
use crate::domain::ports::ProposalStore;

#[derive(Clone)]
pub struct SqliteProposalStore {
    pool: SqlitePool,
}

impl SqliteProposalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: String,
    swarm_id: String,
    options: String,
    voting_method: String,
    quorum_type: String,
    quorum_value: f64,
    created_at: String,
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = StorageError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(Proposal {
            id: Uuid::parse_str(&row.id).map_err(|e| StorageError::Serialization(e.to_string()))?,
            swarm_id: row.swarm_id,
            options: serde_json::from_str(&row.options)?,
            voting_method: parse_voting_method(&row.voting_method)?,
            quorum_type: parse_quorum_type(&row.quorum_type)?,
            quorum_value: row.quorum_value,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

fn voting_method_str(method: VotingMethod) -> &'static str {
    match method {
        VotingMethod::Majority => "majority",
        VotingMethod::Supermajority => "supermajority",
        VotingMethod::Unanimous => "unanimous",
        VotingMethod::Ranked => "ranked",
        VotingMethod::Weighted => "weighted",
    }
}

fn parse_voting_method(s: &str) -> Result<VotingMethod, StorageError> {
    match s {
        "majority" => Ok(VotingMethod::Majority),
        "supermajority" => Ok(VotingMethod::Supermajority),
        "unanimous" => Ok(VotingMethod::Unanimous),
        "ranked" => Ok(VotingMethod::Ranked),
        "weighted" => Ok(VotingMethod::Weighted),
        other => Err(StorageError::Serialization(format!("unknown voting_method: {other}"))),
    }
}

fn quorum_type_str(quorum: QuorumType) -> &'static str {
    match quorum {
        QuorumType::None => "none",
        QuorumType::Absolute => "absolute",
        QuorumType::Percentage => "percentage",
    }
}

fn parse_quorum_type(s: &str) -> Result<QuorumType, StorageError> {
    match s {
        "none" => Ok(QuorumType::None),
        "absolute" => Ok(QuorumType::Absolute),
        "percentage" => Ok(QuorumType::Percentage),
        other => Err(StorageError::Serialization(format!("unknown quorum_type: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    voter_handle: String,
    vote_value: String,
    vote_weight: f64,
}

impl From<VoteRow> for Vote {
    fn from(row: VoteRow) -> Self {
        Vote { voter_handle: row.voter_handle, vote_value: row.vote_value, vote_weight: row.vote_weight }
    }
}

#[async_trait]
impl ProposalStore for SqliteProposalStore {
    async fn create(&self, proposal: &Proposal) -> Result<(), StorageError> {
        let options_json = serde_json::to_string(&proposal.options)?;
        sqlx::query(
            r#"INSERT INTO consensus_proposals (id, swarm_id, options, voting_method, quorum_type,
               quorum_value, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(proposal.id.to_string())
        .bind(&proposal.swarm_id)
        .bind(&options_json)
        .bind(voting_method_str(proposal.voting_method))
        .bind(quorum_type_str(proposal.quorum_type))
        .bind(proposal.quorum_value)
        .bind(proposal.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Proposal>, StorageError> {
        let row: Option<ProposalRow> = sqlx::query_as("SELECT * FROM consensus_proposals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Proposal::try_from).transpose()
    }

    async fn list(&self, swarm_id: &str) -> Result<Vec<Proposal>, StorageError> {
        let rows: Vec<ProposalRow> =
            sqlx::query_as("SELECT * FROM consensus_proposals WHERE swarm_id = ? ORDER BY created_at")
                .bind(swarm_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Proposal::try_from).collect()
    }

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StorageError> {
        let rows: Vec<VoteRow> = sqlx::query_as(
            "SELECT voter_handle, vote_value, vote_weight FROM consensus_votes WHERE proposal_id = ? ORDER BY cast_at",
        )
        .bind(proposal_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Vote::from).collect())
    }

    async fn upsert_vote(&self, proposal_id: Uuid, vote: Vote) -> Result<Vote, StorageError> {
        sqlx::query(
            r#"INSERT INTO consensus_votes (proposal_id, voter_handle, vote_value, vote_weight, cast_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (proposal_id, voter_handle)
               DO UPDATE SET vote_value = excluded.vote_value, vote_weight = excluded.vote_weight, cast_at = excluded.cast_at"#,
        )
        .bind(proposal_id.to_string())
        .bind(&vote.voter_handle)
        .bind(&vote.vote_value)
        .bind(vote.vote_weight)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(vote)
    }
}
