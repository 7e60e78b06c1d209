//! Simulation gate in front of consensus

use crate::simulator::{SimulationResult, Simulator};
use dashmap::DashMap;
use tracing::{debug, warn};
use vigil_common::{Proposal, TagSnapshot};

/// Gate thresholds, configuration-supplied
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Proposals above this risk must be simulated before consensus
    pub risk_threshold: f64,
    /// Risky proposals below this simulation confidence are rejected outright
    pub min_confidence: f64,
    /// Consecutive gate failures for one resource set before escalating
    pub repeat_failure_threshold: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            min_confidence: 0.5,
            repeat_failure_threshold: 3,
        }
    }
}

/// Gate verdict for one proposal
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// May enter a consensus round; carries the simulation when one was required
    Cleared { simulation: Option<SimulationResult> },
    /// Never reaches consensus
    Rejected {
        reason: String,
        /// Set when the same resource set keeps failing and a human should look
        escalate: bool,
    },
}

/// Risk gate between node proposals and the consensus validator
pub struct SimulationGate {
    config: GateConfig,
    simulator: Simulator,
    /// Consecutive failures per resource set, keyed by the sorted tag list
    failures: DashMap<String, u32>,
}

impl SimulationGate {
    pub fn new(config: GateConfig, simulator: Simulator) -> Self {
        Self {
            config,
            simulator,
            failures: DashMap::new(),
        }
    }

    pub fn risk_threshold(&self) -> f64 {
        self.config.risk_threshold
    }

    fn resource_key(proposal: &Proposal) -> String {
        let parts: Vec<&str> = proposal.target_tags.iter().map(|t| t.as_str()).collect();
        parts.join(",")
    }

    /// Assess a proposal before it may enter consensus.
    pub fn assess(&self, proposal: &Proposal, snapshot: &TagSnapshot) -> GateDecision {
        if proposal.risk_score <= self.config.risk_threshold {
            // Below threshold: simulation is optional and skipped here.
            return GateDecision::Cleared { simulation: None };
        }

        let key = Self::resource_key(proposal);
        match self.simulator.simulate(proposal, snapshot) {
            Ok(result) if result.confidence >= self.config.min_confidence => {
                self.failures.remove(&key);
                debug!(
                    proposal = %proposal.id,
                    risk = result.predicted_risk,
                    confidence = result.confidence,
                    "risky proposal cleared by simulation"
                );
                GateDecision::Cleared {
                    simulation: Some(result),
                }
            }
            Ok(result) => self.record_failure(
                &key,
                format!(
                    "simulation confidence {:.2} below minimum {:.2}",
                    result.confidence, self.config.min_confidence
                ),
            ),
            Err(err) => self.record_failure(&key, format!("simulation failed: {err}")),
        }
    }

    fn record_failure(&self, key: &str, reason: String) -> GateDecision {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        let escalate = *count >= self.config.repeat_failure_threshold;
        if escalate {
            warn!(resource_set = key, failures = *count, "repeated gate failures, escalating");
        }
        GateDecision::Rejected { reason, escalate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FirstOrderModel, FirstOrderParams};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;
    use vigil_common::{
        ControlAction, NodeId, ObjectiveScores, Proposal, Tag, TagId, TagQuality, TagValue,
    };

    fn snapshot(quality: TagQuality) -> TagSnapshot {
        let mut tags = HashMap::new();
        tags.insert(
            TagId::from("A"),
            Tag {
                id: TagId::from("A"),
                value: TagValue::Float(50.0),
                quality,
                timestamp: Utc::now(),
                version: 1,
            },
        );
        TagSnapshot::new(tags)
    }

    fn gate() -> SimulationGate {
        let model = FirstOrderModel::default().with_tag(
            "A",
            FirstOrderParams {
                gain: 1.0,
                time_constant_s: 5.0,
                horizon_s: 60.0,
                low_limit: 0.0,
                high_limit: 100.0,
            },
        );
        SimulationGate::new(GateConfig::default(), Simulator::new(Arc::new(model)))
    }

    fn proposal(risk: f64) -> Proposal {
        Proposal::new(
            NodeId::from("n1"),
            ControlAction::single("adjust", "A", 55.0),
            risk,
            0.9,
            ObjectiveScores::default(),
            Default::default(),
        )
    }

    #[test]
    fn test_low_risk_skips_simulation() {
        let gate = gate();
        match gate.assess(&proposal(0.2), &snapshot(TagQuality::Good)) {
            GateDecision::Cleared { simulation } => assert!(simulation.is_none()),
            other => panic!("expected cleared, got {other:?}"),
        }
    }

    #[test]
    fn test_risky_proposal_gets_simulated() {
        let gate = gate();
        match gate.assess(&proposal(0.9), &snapshot(TagQuality::Good)) {
            GateDecision::Cleared { simulation } => assert!(simulation.is_some()),
            other => panic!("expected cleared, got {other:?}"),
        }
    }

    #[test]
    fn test_low_confidence_rejected_before_consensus() {
        // Bad input quality drops model confidence to 0.2, below the 0.5 floor.
        let gate = gate();
        match gate.assess(&proposal(0.9), &snapshot(TagQuality::Bad)) {
            GateDecision::Rejected { escalate, .. } => assert!(!escalate),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_failures_escalate() {
        let gate = gate();
        let snap = snapshot(TagQuality::Bad);
        let mut last_escalate = false;
        for _ in 0..3 {
            if let GateDecision::Rejected { escalate, .. } = gate.assess(&proposal(0.9), &snap) {
                last_escalate = escalate;
            }
        }
        assert!(last_escalate);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let gate = gate();
        gate.assess(&proposal(0.9), &snapshot(TagQuality::Bad));
        gate.assess(&proposal(0.9), &snapshot(TagQuality::Bad));
        gate.assess(&proposal(0.9), &snapshot(TagQuality::Good));
        // Streak reset: the next failure starts over instead of escalating.
        match gate.assess(&proposal(0.9), &snapshot(TagQuality::Bad)) {
            GateDecision::Rejected { escalate, .. } => assert!(!escalate),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
