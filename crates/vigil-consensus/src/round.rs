//! Round state and outcomes
//!
//! A round is the unit of conflict resolution: all proposals contending for an
//! overlapping set of tags are judged together. Rounds move
//! `Collecting -> Scoring -> Deciding -> Terminal` and terminal is final; a
//! round is never reopened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;
use vigil_common::{Proposal, TagId};

/// Round lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    Collecting,
    Scoring,
    Deciding,
    Terminal,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundState::Collecting => "Collecting",
            RoundState::Scoring => "Scoring",
            RoundState::Deciding => "Deciding",
            RoundState::Terminal => "Terminal",
        };
        f.write_str(s)
    }
}

/// Why a round was surfaced to a human instead of decided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EscalationReason {
    /// Top two aggregate scores closer than the configured margin
    Ambiguous { gap: f64 },
    /// Winning proposal's confidence below the configured minimum
    LowConfidence { confidence: f64 },
    /// Round sat undecided past the deciding timeout
    Timeout,
    /// A referenced tag's version ran away mid-round
    Cancelled { tag: TagId, delta: u64 },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::Ambiguous { gap } => {
                write!(f, "ambiguous: top-two score gap {gap:.4}")
            }
            EscalationReason::LowConfidence { confidence } => {
                write!(f, "winner confidence {confidence:.2} too low")
            }
            EscalationReason::Timeout => f.write_str("deciding timeout"),
            EscalationReason::Cancelled { tag, delta } => {
                write!(f, "tag {tag} advanced {delta} versions mid-round")
            }
        }
    }
}

/// Terminal outcome of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Approved { proposal_id: Uuid },
    Rejected,
    Escalated(EscalationReason),
}

/// One proposal inside a round, with its gate provenance
#[derive(Debug, Clone)]
pub struct Candidate {
    pub proposal: Proposal,
    /// True when the simulation gate actually ran a simulation for it
    pub simulated: bool,
}

/// A consensus round over one contested resource set
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    pub round_id: Uuid,
    /// Union of candidate target tags; grows as overlapping proposals arrive
    pub resource_set: BTreeSet<TagId>,
    pub candidates: Vec<Candidate>,
    pub state: RoundState,
    pub opened_at: DateTime<Utc>,
    /// End of the collection window
    pub closes_at: DateTime<Utc>,
    pub outcome: Option<RoundOutcome>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ConsensusRound {
    pub fn open(first: Candidate, opened_at: DateTime<Utc>, closes_at: DateTime<Utc>) -> Self {
        Self {
            round_id: Uuid::now_v7(),
            resource_set: first.proposal.target_tags.clone(),
            candidates: vec![first],
            state: RoundState::Collecting,
            opened_at,
            closes_at,
            outcome: None,
            decided_at: None,
        }
    }

    pub fn admit(&mut self, candidate: Candidate) {
        self.resource_set.extend(candidate.proposal.target_tags.iter().cloned());
        self.candidates.push(candidate);
    }

    /// Fold another round into this one when their resource sets became
    /// connected through a bridging proposal.
    pub fn absorb(&mut self, other: ConsensusRound) {
        self.resource_set.extend(other.resource_set);
        self.candidates.extend(other.candidates);
        // The merged round keeps the earlier deadline so collection stays
        // bounded by the first proposal's window.
        if other.closes_at < self.closes_at {
            self.closes_at = other.closes_at;
        }
        if other.opened_at < self.opened_at {
            self.opened_at = other.opened_at;
        }
    }

    pub fn contends_for(&self, tags: &BTreeSet<TagId>) -> bool {
        self.resource_set.intersection(tags).next().is_some()
    }

    pub fn finalize(&mut self, outcome: RoundOutcome, decided_at: DateTime<Utc>) {
        self.state = RoundState::Terminal;
        self.outcome = Some(outcome);
        self.decided_at = Some(decided_at);
    }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            round_id: self.round_id,
            resource_set: self.resource_set.clone(),
            state: self.state,
            candidates: self.candidates.len(),
            opened_at: self.opened_at,
            outcome: self.outcome.clone(),
        }
    }
}

/// Lightweight view of a round for the supervisory surface
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round_id: Uuid,
    pub resource_set: BTreeSet<TagId>,
    pub state: RoundState,
    pub candidates: usize,
    pub opened_at: DateTime<Utc>,
    pub outcome: Option<RoundOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use vigil_common::{ControlAction, NodeId, ObjectiveScores};

    fn candidate(node: &str, tags: &[&str]) -> Candidate {
        let writes = tags.iter().map(|t| vigil_common::TagWrite::new(*t, 1.0)).collect();
        Candidate {
            proposal: Proposal::new(
                NodeId::from(node),
                ControlAction::new("test", writes),
                0.1,
                0.9,
                ObjectiveScores::default(),
                BTreeMap::new(),
            ),
            simulated: false,
        }
    }

    #[test]
    fn test_admit_grows_resource_set() {
        let now = Utc::now();
        let mut round = ConsensusRound::open(candidate("n1", &["A"]), now, now + Duration::milliseconds(250));
        round.admit(candidate("n2", &["A", "B"]));
        assert_eq!(round.resource_set.len(), 2);
        assert_eq!(round.candidates.len(), 2);
    }

    #[test]
    fn test_absorb_keeps_earlier_deadline() {
        let now = Utc::now();
        let mut a = ConsensusRound::open(candidate("n1", &["A"]), now, now + Duration::milliseconds(500));
        let b = ConsensusRound::open(
            candidate("n2", &["B"]),
            now - Duration::milliseconds(100),
            now + Duration::milliseconds(150),
        );
        a.absorb(b);
        assert_eq!(a.resource_set.len(), 2);
        assert_eq!(a.closes_at, now + Duration::milliseconds(150));
        assert_eq!(a.opened_at, now - Duration::milliseconds(100));
    }

    #[test]
    fn test_finalize_is_terminal() {
        let now = Utc::now();
        let mut round = ConsensusRound::open(candidate("n1", &["A"]), now, now);
        round.finalize(RoundOutcome::Rejected, now);
        assert_eq!(round.state, RoundState::Terminal);
        assert!(round.decided_at.is_some());
    }
}
