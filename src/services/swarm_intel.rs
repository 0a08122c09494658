//! Pure calculators over swarm-intelligence rows (spec.md §4.9), plus
//! `ConsensusService` for the one operation that is in scope as a
//! persisted, atomic call: `upsertVote` (spec.md §4.1).
//!
//! Storage for pheromone trails and payoff contracts is plain CRUD and
//! out of scope for this core (spec.md §1); `tally_votes`,
//! `effective_intensity`/`is_active`, and `calculate_payoff` don't touch
//! a store themselves — callers load the rows and hand over the typed
//! value.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::MessagingError;
use crate::domain::models::{ConsensusProposal, PayoffContract, PheromoneTrail, QuorumType, TallyResult, Vote, VotingMethod};
use crate::domain::ports::ProposalStore;

/// Tallies `proposal`'s votes and determines quorum/threshold/winner.
///
/// Ranked ballots use Borda count: a ballot ranking `n` options awards its
/// first choice `n * weight` points, its second `(n-1) * weight`, and so
/// on. Non-ranked methods award a vote's full weight to the one option it
/// names; a `voteValue` outside `proposal.options` contributes nothing.
/// Ties are broken deterministically by the option's position in
/// `proposal.options` — the earlier option wins.
pub fn tally_votes(proposal: &ConsensusProposal) -> TallyResult {
    let mut tally: std::collections::BTreeMap<String, f64> =
        proposal.options.iter().map(|o| (o.clone(), 0.0)).collect();
    let mut total_weight = 0.0;

    for vote in &proposal.votes {
        total_weight += vote.vote_weight;
        match proposal.voting_method {
            VotingMethod::Ranked => {
                let Ok(ranking) = serde_json::from_str::<Vec<String>>(&vote.vote_value) else {
                    continue;
                };
                let n = ranking.len();
                for (i, option) in ranking.iter().enumerate() {
                    if let Some(points) = tally.get_mut(option) {
                        *points += (n - i) as f64 * vote.vote_weight;
                    }
                }
            }
            VotingMethod::Majority | VotingMethod::Supermajority | VotingMethod::Unanimous | VotingMethod::Weighted => {
                if let Some(points) = tally.get_mut(&vote.vote_value) {
                    *points += vote.vote_weight;
                }
            }
        }
    }

    let mut winner: Option<(&str, f64)> = None;
    for option in &proposal.options {
        let score = tally[option.as_str()];
        match winner {
            Some((_, best)) if score <= best => {}
            _ => winner = Some((option.as_str(), score)),
        }
    }
    let winner = if proposal.votes.is_empty() { None } else { winner.map(|(o, _)| o.to_string()) };

    let quorum_met = match proposal.quorum_type {
        QuorumType::None => !proposal.votes.is_empty(),
        QuorumType::Absolute => proposal.votes.len() as f64 >= proposal.quorum_value,
        // Percentage quorum needs an eligible-voter denominator this core
        // doesn't own (spec.md Open Question): resolved here as "quorum
        // passes once any vote has been cast", deferring the real
        // denominator check to whatever tracks swarm membership.
        QuorumType::Percentage => !proposal.votes.is_empty(),
    };

    let threshold = match proposal.voting_method {
        VotingMethod::Majority | VotingMethod::Ranked | VotingMethod::Weighted => 0.5,
        VotingMethod::Supermajority => 2.0 / 3.0,
        VotingMethod::Unanimous => 1.0,
    };
    let threshold_met = winner
        .as_ref()
        .map(|w| total_weight > 0.0 && tally[w] / total_weight >= threshold)
        .unwrap_or(false);

    TallyResult { tally, total_weight, winner, quorum_met, threshold_met }
}

/// Current intensity after exponential decay since `trail.created_at`.
pub fn effective_intensity(trail: &PheromoneTrail, now: DateTime<Utc>) -> f64 {
    let hours_since = (now - trail.created_at).num_seconds() as f64 / 3600.0;
    trail.intensity * (-trail.decay_rate_per_hour * hours_since).exp()
}

/// A trail is active once its decayed intensity is still at or above
/// `min_intensity`.
pub fn is_active(trail: &PheromoneTrail, now: DateTime<Utc>, min_intensity: f64) -> bool {
    effective_intensity(trail, now) >= min_intensity
}

/// `base * multiplier`, linearly decayed for every hour past `deadline`,
/// plus any satisfied bonus conditions. Never goes negative before bonuses
/// are added.
pub fn calculate_payoff(contract: &PayoffContract, now: DateTime<Utc>) -> f64 {
    let base = contract.base_value * contract.multiplier;
    let overdue_hours = (now - contract.deadline).num_seconds().max(0) as f64 / 3600.0;
    let decayed = (base - contract.decay_rate * overdue_hours).max(0.0);
    let bonus: f64 = contract
        .bonus_conditions
        .iter()
        .filter(|b| b.satisfied)
        .map(|b| b.bonus)
        .sum();
    decayed + bonus
}

/// Total ordering helper for sorting options by tally score, descending.
pub fn by_score_desc(a: &(String, f64), b: &(String, f64)) -> Ordering {
    b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal)
}

/// Thin pass-through over `ProposalStore`, loading a proposal's votes and
/// assembling the `tally_votes` input so callers never hand-construct a
/// `ConsensusProposal` themselves (spec.md §4.1's `upsertVote`, §4.9).
pub struct ConsensusService {
    proposals: Arc<dyn ProposalStore>,
}

impl ConsensusService {
    pub fn new(proposals: Arc<dyn ProposalStore>) -> Self {
        Self { proposals }
    }

    /// Casts (or replaces) `voter_handle`'s ballot on `proposal_id`.
    pub async fn cast_vote(
        &self,
        proposal_id: Uuid,
        voter_handle: &str,
        vote_value: &str,
        vote_weight: f64,
    ) -> Result<Vote, MessagingError> {
        let vote = Vote { voter_handle: voter_handle.to_string(), vote_value: vote_value.to_string(), vote_weight };
        Ok(self.proposals.upsert_vote(proposal_id, vote).await?)
    }

    /// Loads `proposal_id` and its votes and tallies them.
    pub async fn tally(&self, proposal_id: Uuid) -> Result<Option<TallyResult>, MessagingError> {
        let Some(proposal) = self.proposals.get(proposal_id).await? else {
            return Ok(None);
        };
        let votes = self.proposals.list_votes(proposal_id).await?;
        Ok(Some(tally_votes(&proposal.with_votes(votes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BonusCondition, Vote};
    use chrono::Duration;

    fn proposal(method: VotingMethod, votes: Vec<Vote>) -> ConsensusProposal {
        ConsensusProposal {
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            voting_method: method,
            quorum_type: QuorumType::None,
            quorum_value: 0.0,
            votes,
        }
    }

    #[test]
    fn ranked_borda_count_matches_worked_example() {
        let votes = vec![
            Vote { voter_handle: "v1".into(), vote_value: r#"["A","B","C"]"#.into(), vote_weight: 1.0 },
            Vote { voter_handle: "v2".into(), vote_value: r#"["B","A","C"]"#.into(), vote_weight: 1.0 },
            Vote { voter_handle: "v3".into(), vote_value: r#"["C","A","B"]"#.into(), vote_weight: 2.0 },
        ];
        let result = tally_votes(&proposal(VotingMethod::Ranked, votes));

        assert_eq!(result.tally["A"], 9.0);
        assert_eq!(result.tally["B"], 7.0);
        assert_eq!(result.tally["C"], 8.0);
        assert_eq!(result.winner, Some("A".to_string()));
        assert_eq!(result.total_weight, 4.0);
    }

    #[test]
    fn majority_vote_full_weight_to_named_option() {
        let votes = vec![
            Vote { voter_handle: "v1".into(), vote_value: "A".into(), vote_weight: 1.0 },
            Vote { voter_handle: "v2".into(), vote_value: "A".into(), vote_weight: 1.0 },
            Vote { voter_handle: "v3".into(), vote_value: "B".into(), vote_weight: 1.0 },
        ];
        let result = tally_votes(&proposal(VotingMethod::Majority, votes));
        assert_eq!(result.winner, Some("A".to_string()));
        assert!(result.threshold_met);
    }

    #[test]
    fn vote_for_unknown_option_is_dropped() {
        let votes = vec![Vote { voter_handle: "v1".into(), vote_value: "Z".into(), vote_weight: 1.0 }];
        let result = tally_votes(&proposal(VotingMethod::Majority, votes));
        assert_eq!(result.tally["A"], 0.0);
        assert_eq!(result.total_weight, 1.0);
    }

    #[test]
    fn no_votes_has_no_winner() {
        let result = tally_votes(&proposal(VotingMethod::Majority, vec![]));
        assert_eq!(result.winner, None);
    }

    #[test]
    fn pheromone_decays_exponentially() {
        let now = Utc::now();
        let trail = PheromoneTrail { intensity: 1.0, decay_rate_per_hour: 0.1, created_at: now - Duration::hours(10) };
        let decayed = effective_intensity(&trail, now);
        assert!(decayed < 1.0);
        assert!((decayed - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn pheromone_activity_threshold() {
        let now = Utc::now();
        let trail = PheromoneTrail { intensity: 1.0, decay_rate_per_hour: 1.0, created_at: now - Duration::hours(5) };
        assert!(!is_active(&trail, now, 0.1));
        assert!(is_active(&trail, now, 0.001));
    }

    #[test]
    fn payoff_decays_past_deadline_and_adds_bonuses() {
        let now = Utc::now();
        let contract = PayoffContract {
            base_value: 100.0,
            multiplier: 1.0,
            decay_rate: 10.0,
            deadline: now - Duration::hours(3),
            bonus_conditions: vec![
                BonusCondition { satisfied: true, bonus: 5.0 },
                BonusCondition { satisfied: false, bonus: 50.0 },
            ],
        };
        assert_eq!(calculate_payoff(&contract, now), 100.0 - 30.0 + 5.0);
    }

    #[test]
    fn payoff_never_goes_negative_before_bonuses() {
        let now = Utc::now();
        let contract = PayoffContract {
            base_value: 10.0,
            multiplier: 1.0,
            decay_rate: 100.0,
            deadline: now - Duration::hours(5),
            bonus_conditions: vec![],
        };
        assert_eq!(calculate_payoff(&contract, now), 0.0);
    }
}
