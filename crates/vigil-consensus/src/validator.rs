//! The consensus validator
//!
//! Collects proposals into rounds by connected target-tag overlap, closes each
//! round when its collection window expires, filters ineligible candidates,
//! and decides with the deterministic scorer. The engine drives `submit` and
//! `close_due` from its async loop and forwards emitted decisions to the
//! dispatcher.

use crate::round::{
    Candidate, ConsensusRound, EscalationReason, RoundOutcome, RoundState, RoundSummary,
};
use crate::scoring::{decide, Verdict};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vigil_common::{ConsensusError, NodeId, NodeStatus, ObjectiveWeights, Proposal, TagId};

/// Where the validator reads current tag versions for staleness checks
pub trait TagVersionSource: Send + Sync {
    fn current_versions(&self, tags: &BTreeSet<TagId>) -> BTreeMap<TagId, u64>;
}

/// Where the validator reads origin-node lifecycle status
pub trait NodeStatusSource: Send + Sync {
    fn node_status(&self, node: &NodeId) -> Option<NodeStatus>;
}

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub collection_window: Duration,
    /// Bound on how long a closed round may wait for a decision
    pub deciding_timeout: Duration,
    /// Minimum top-two score gap for a clean approval
    pub ambiguity_margin: f64,
    /// Minimum winner confidence for approval
    pub min_confidence: f64,
    /// Proposals above this risk must have been simulated to be eligible
    pub risk_threshold: f64,
    /// Version advance on a referenced tag that tears the round down
    pub cancel_version_delta: u64,
    pub weights: ObjectiveWeights,
    /// Terminal round summaries retained for the supervisory surface
    pub history_limit: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            collection_window: Duration::milliseconds(crate::DEFAULT_COLLECTION_WINDOW_MS),
            deciding_timeout: Duration::milliseconds(crate::DEFAULT_DECIDING_TIMEOUT_MS),
            ambiguity_margin: crate::DEFAULT_AMBIGUITY_MARGIN,
            min_confidence: crate::DEFAULT_MIN_CONFIDENCE,
            risk_threshold: 0.7,
            cancel_version_delta: crate::DEFAULT_CANCEL_VERSION_DELTA,
            weights: ObjectiveWeights::default(),
            history_limit: 256,
        }
    }
}

/// A terminal round result handed to the engine
#[derive(Debug, Clone)]
pub struct Decision {
    pub round_id: Uuid,
    pub resource_set: BTreeSet<TagId>,
    pub outcome: RoundOutcome,
    /// Full winning proposal when the outcome is `Approved`
    pub approved: Option<Proposal>,
    /// True when a human resolved this through an escalation
    pub human_resolved: bool,
    pub opened_at: DateTime<Utc>,
    pub decided_at: DateTime<Utc>,
}

/// Human verdict on an escalated round
#[derive(Debug, Clone)]
pub enum EscalationDecision {
    Approve { proposal_id: Uuid },
    Reject,
}

/// Validator counters, exported through the engine's metrics surface
#[derive(Debug, Default)]
pub struct ValidatorMetrics {
    pub rounds_opened: AtomicU64,
    pub rounds_approved: AtomicU64,
    pub rounds_rejected: AtomicU64,
    pub rounds_escalated: AtomicU64,
    pub candidates_stale: AtomicU64,
    pub candidates_unsimulated: AtomicU64,
    pub candidates_degraded_origin: AtomicU64,
}

struct Inner {
    /// Rounds still collecting, disjoint by resource set
    open: Vec<ConsensusRound>,
    /// Escalated rounds awaiting a human verdict
    escalated: HashMap<Uuid, ConsensusRound>,
    /// Terminal round summaries, newest last, bounded
    history: VecDeque<RoundSummary>,
}

/// Consensus validator over contested resource sets
pub struct ConsensusValidator {
    config: ValidatorConfig,
    versions: Arc<dyn TagVersionSource>,
    nodes: Arc<dyn NodeStatusSource>,
    inner: Mutex<Inner>,
    metrics: ValidatorMetrics,
}

impl ConsensusValidator {
    pub fn new(
        config: ValidatorConfig,
        versions: Arc<dyn TagVersionSource>,
        nodes: Arc<dyn NodeStatusSource>,
    ) -> Self {
        Self {
            config,
            versions,
            nodes,
            inner: Mutex::new(Inner {
                open: Vec::new(),
                escalated: HashMap::new(),
                history: VecDeque::new(),
            }),
            metrics: ValidatorMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ValidatorMetrics {
        &self.metrics
    }

    /// Admit a gate-cleared proposal into a round.
    ///
    /// Rounds are keyed by connected overlap: a proposal touching tags of
    /// several open rounds bridges them into one.
    #[instrument(skip(self, proposal), fields(proposal = %proposal.id, origin = %proposal.origin_node_id))]
    pub fn submit(&self, proposal: Proposal, simulated: bool) -> Uuid {
        let now = Utc::now();
        let tags = proposal.target_tags.clone();
        let candidate = Candidate { proposal, simulated };

        let mut inner = self.inner.lock();
        let matching: Vec<usize> = inner
            .open
            .iter()
            .enumerate()
            .filter(|(_, r)| r.contends_for(&tags))
            .map(|(i, _)| i)
            .collect();

        match matching.split_first() {
            None => {
                let round =
                    ConsensusRound::open(candidate, now, now + self.config.collection_window);
                let round_id = round.round_id;
                debug!(round = %round_id, "round opened");
                inner.open.push(round);
                self.metrics.rounds_opened.fetch_add(1, Ordering::Relaxed);
                round_id
            }
            Some((&first, rest)) => {
                for &i in rest.iter().rev() {
                    let absorbed = inner.open.remove(i);
                    debug!(absorbed = %absorbed.round_id, into = %inner.open[first].round_id, "rounds bridged");
                    inner.open[first].absorb(absorbed);
                }
                inner.open[first].admit(candidate);
                inner.open[first].round_id
            }
        }
    }

    /// Close and decide every round whose collection window has expired.
    /// Called on an interval by the engine.
    pub fn close_due(&self, now: DateTime<Utc>) -> Vec<Decision> {
        let mut due = Vec::new();
        {
            let mut inner = self.inner.lock();
            let mut i = 0;
            while i < inner.open.len() {
                if inner.open[i].closes_at <= now {
                    due.push(inner.open.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        let mut decisions = Vec::with_capacity(due.len());
        for mut round in due {
            let decision = if now - round.closes_at > self.config.deciding_timeout {
                // The engine stalled past the deciding bound; never decide on
                // that stale a window.
                warn!(round = %round.round_id, "deciding timeout, escalating");
                round.finalize(RoundOutcome::Escalated(EscalationReason::Timeout), now);
                self.decision_of(&round, None, false)
            } else {
                self.decide_round(&mut round, now)
            };
            self.archive(round, &decision);
            decisions.push(decision);
        }
        decisions
    }

    #[instrument(skip(self, round), fields(round = %round.round_id, candidates = round.candidates.len()))]
    fn decide_round(&self, round: &mut ConsensusRound, now: DateTime<Utc>) -> Decision {
        round.state = RoundState::Scoring;

        // Staleness and cancellation cover every tag a candidate computed
        // from, not just the tags the round contends for: a proposal built on
        // an outdated reading is as invalid as one writing to a moved target.
        let mut referenced = round.resource_set.clone();
        for candidate in &round.candidates {
            referenced.extend(candidate.proposal.tag_versions.keys().cloned());
        }
        let current = self.versions.current_versions(&referenced);

        // Cancellation: the world moved too far under this round.
        for candidate in &round.candidates {
            for (tag, recorded) in &candidate.proposal.tag_versions {
                if let Some(cur) = current.get(tag) {
                    let delta = cur.saturating_sub(*recorded);
                    if delta > self.config.cancel_version_delta {
                        warn!(tag = %tag, delta, "round cancelled, tag ran away mid-round");
                        round.finalize(
                            RoundOutcome::Escalated(EscalationReason::Cancelled {
                                tag: tag.clone(),
                                delta,
                            }),
                            now,
                        );
                        return self.decision_of(round, None, false);
                    }
                }
            }
        }

        let mut eligible: Vec<&Proposal> = Vec::with_capacity(round.candidates.len());
        for candidate in &round.candidates {
            let p = &candidate.proposal;
            if p.risk_score > self.config.risk_threshold && !candidate.simulated {
                self.metrics.candidates_unsimulated.fetch_add(1, Ordering::Relaxed);
                debug!(proposal = %p.id, "excluded: risky and never simulated");
                continue;
            }
            match self.nodes.node_status(&p.origin_node_id) {
                Some(status) if status.participates_in_consensus() => {}
                status => {
                    self.metrics.candidates_degraded_origin.fetch_add(1, Ordering::Relaxed);
                    debug!(proposal = %p.id, origin = %p.origin_node_id, ?status, "excluded: origin not Active");
                    continue;
                }
            }
            let stale = p
                .tag_versions
                .iter()
                .any(|(tag, v)| current.get(tag).is_some_and(|cur| cur > v));
            if stale {
                self.metrics.candidates_stale.fetch_add(1, Ordering::Relaxed);
                debug!(proposal = %p.id, "excluded: computed from stale tag versions");
                continue;
            }
            eligible.push(p);
        }

        round.state = RoundState::Deciding;
        let outcome = match decide(
            eligible,
            &self.config.weights,
            self.config.ambiguity_margin,
            self.config.min_confidence,
        ) {
            None => RoundOutcome::Rejected,
            Some(Verdict::Approved { proposal_id }) => RoundOutcome::Approved { proposal_id },
            Some(Verdict::Ambiguous { gap }) => {
                RoundOutcome::Escalated(EscalationReason::Ambiguous { gap })
            }
            Some(Verdict::LowConfidence { confidence }) => {
                RoundOutcome::Escalated(EscalationReason::LowConfidence { confidence })
            }
        };

        let approved = match &outcome {
            RoundOutcome::Approved { proposal_id } => round
                .candidates
                .iter()
                .find(|c| c.proposal.id == *proposal_id)
                .map(|c| c.proposal.clone()),
            _ => None,
        };

        round.finalize(outcome, now);
        info!(outcome = ?round.outcome, "round decided");
        self.decision_of(round, approved, false)
    }

    fn decision_of(
        &self,
        round: &ConsensusRound,
        approved: Option<Proposal>,
        human_resolved: bool,
    ) -> Decision {
        Decision {
            round_id: round.round_id,
            resource_set: round.resource_set.clone(),
            outcome: round.outcome.clone().unwrap_or(RoundOutcome::Rejected),
            approved,
            human_resolved,
            opened_at: round.opened_at,
            decided_at: round.decided_at.unwrap_or_else(Utc::now),
        }
    }

    fn archive(&self, round: ConsensusRound, decision: &Decision) {
        match &decision.outcome {
            RoundOutcome::Approved { .. } => {
                self.metrics.rounds_approved.fetch_add(1, Ordering::Relaxed);
            }
            RoundOutcome::Rejected => {
                self.metrics.rounds_rejected.fetch_add(1, Ordering::Relaxed);
            }
            RoundOutcome::Escalated(_) => {
                self.metrics.rounds_escalated.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut inner = self.inner.lock();
        inner.history.push_back(round.summary());
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }
        if matches!(decision.outcome, RoundOutcome::Escalated(_)) {
            inner.escalated.insert(round.round_id, round);
        }
    }

    /// Apply a human verdict to an escalated round, exactly once.
    #[instrument(skip(self))]
    pub fn resolve_escalation(
        &self,
        round_id: Uuid,
        verdict: EscalationDecision,
    ) -> Result<Decision, ConsensusError> {
        let mut inner = self.inner.lock();
        let Some(round) = inner.escalated.get(&round_id) else {
            // Distinguish "resolved already" and "never escalated" from
            // "never existed" using the history.
            return match inner.history.iter().find(|s| s.round_id == round_id) {
                Some(s) if matches!(s.outcome, Some(RoundOutcome::Escalated(_))) => {
                    Err(ConsensusError::AlreadyResolved(round_id))
                }
                Some(s) => Err(ConsensusError::NotEscalated {
                    round: round_id,
                    state: s.state.to_string(),
                }),
                None => {
                    if inner.open.iter().any(|r| r.round_id == round_id) {
                        Err(ConsensusError::NotEscalated {
                            round: round_id,
                            state: RoundState::Collecting.to_string(),
                        })
                    } else {
                        Err(ConsensusError::RoundNotFound(round_id))
                    }
                }
            };
        };

        let approved = match &verdict {
            EscalationDecision::Approve { proposal_id } => Some(
                round
                    .candidates
                    .iter()
                    .find(|c| c.proposal.id == *proposal_id)
                    .map(|c| c.proposal.clone())
                    .ok_or(ConsensusError::UnknownCandidate {
                        round: round_id,
                        proposal: *proposal_id,
                    })?,
            ),
            EscalationDecision::Reject => None,
        };

        let round = inner
            .escalated
            .remove(&round_id)
            .ok_or(ConsensusError::RoundNotFound(round_id))?;
        drop(inner);

        let outcome = match approved.as_ref() {
            Some(p) => RoundOutcome::Approved { proposal_id: p.id },
            None => RoundOutcome::Rejected,
        };
        info!(round = %round_id, outcome = ?outcome, "escalation resolved by human");

        Ok(Decision {
            round_id,
            resource_set: round.resource_set.clone(),
            outcome,
            approved,
            human_resolved: true,
            opened_at: round.opened_at,
            decided_at: Utc::now(),
        })
    }

    /// Rounds still collecting plus escalations awaiting a human.
    pub fn active_rounds(&self) -> Vec<RoundSummary> {
        let inner = self.inner.lock();
        let mut out: Vec<RoundSummary> = inner.open.iter().map(|r| r.summary()).collect();
        out.extend(inner.escalated.values().map(|r| r.summary()));
        out.sort_by_key(|s| s.opened_at);
        out
    }

    /// Escalated rounds awaiting a human verdict.
    pub fn escalations(&self) -> Vec<RoundSummary> {
        let inner = self.inner.lock();
        let mut out: Vec<RoundSummary> = inner.escalated.values().map(|r| r.summary()).collect();
        out.sort_by_key(|s| s.opened_at);
        out
    }

    /// Terminal round summaries, oldest first.
    pub fn history(&self) -> Vec<RoundSummary> {
        self.inner.lock().history.iter().cloned().collect()
    }
}
