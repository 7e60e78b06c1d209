//! Proposals: candidate control actions with multi-objective scores
//!
//! A proposal is immutable once created and consumed exactly once by the
//! consensus validator. It records the tag versions it was computed from so
//! the validator can reject it if the world moved on.

use crate::types::node::NodeId;
use crate::types::tag::{TagId, TagValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A single write an action wants to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagWrite {
    pub tag_id: TagId,
    pub value: TagValue,
}

impl TagWrite {
    pub fn new(tag_id: impl Into<TagId>, value: impl Into<TagValue>) -> Self {
        Self {
            tag_id: tag_id.into(),
            value: value.into(),
        }
    }
}

/// The concrete action a proposal wants executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAction {
    pub writes: Vec<TagWrite>,
    /// Short human-readable intent, surfaced in escalations and audit records
    pub summary: String,
}

impl ControlAction {
    pub fn new(summary: impl Into<String>, writes: Vec<TagWrite>) -> Self {
        Self {
            writes,
            summary: summary.into(),
        }
    }

    pub fn single(summary: impl Into<String>, tag_id: impl Into<TagId>, value: impl Into<TagValue>) -> Self {
        Self::new(summary, vec![TagWrite::new(tag_id, value)])
    }

    pub fn target_tags(&self) -> BTreeSet<TagId> {
        self.writes.iter().map(|w| w.tag_id.clone()).collect()
    }
}

/// Per-objective scores; lower is better for every axis.
///
/// `safety` is weighted to dominate by convention: the default weights make a
/// safety improvement outweigh any combination of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectiveScores {
    pub entropy: f64,
    pub cost: f64,
    pub safety: f64,
    pub productivity: f64,
}

impl ObjectiveScores {
    pub fn new(entropy: f64, cost: f64, safety: f64, productivity: f64) -> Self {
        Self {
            entropy,
            cost,
            safety,
            productivity,
        }
    }

    /// Weighted aggregate: `w_e·entropy + w_c·cost + w_s·safety + w_p·productivity`
    pub fn weighted(&self, w: &ObjectiveWeights) -> f64 {
        w.entropy * self.entropy
            + w.cost * self.cost
            + w.safety * self.safety
            + w.productivity * self.productivity
    }
}

/// Consensus scoring weights, configuration-supplied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub entropy: f64,
    pub cost: f64,
    pub safety: f64,
    pub productivity: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        // Safety dominates: the three other axes are each scored in [0, 1],
        // so a full-scale swing on all of them (3.0) stays below one safety
        // unit at this weight.
        Self {
            entropy: 1.0,
            cost: 1.0,
            safety: 10.0,
            productivity: 1.0,
        }
    }
}

/// Predicted effect of an action on its target tags
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictedEffect {
    /// Expected value delta per tag over the prediction horizon
    pub deltas: BTreeMap<TagId, f64>,
}

impl PredictedEffect {
    pub fn new(deltas: BTreeMap<TagId, f64>) -> Self {
        Self { deltas }
    }

    /// Largest absolute predicted deviation across all tags.
    pub fn max_abs_delta(&self) -> f64 {
        self.deltas.values().fold(0.0, |acc, d| acc.max(d.abs()))
    }
}

/// A candidate action emitted by a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub origin_node_id: NodeId,
    pub target_tags: BTreeSet<TagId>,
    pub action: ControlAction,
    pub predicted_effect: Option<PredictedEffect>,
    /// Monotone in projected deviation, clamped to [0, 1]
    pub risk_score: f64,
    /// Origin node's confidence in the action, in [0, 1]
    pub confidence: f64,
    pub objective_scores: ObjectiveScores,
    /// Tag versions observed when the proposal was computed
    pub tag_versions: BTreeMap<TagId, u64>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        origin_node_id: NodeId,
        action: ControlAction,
        risk_score: f64,
        confidence: f64,
        objective_scores: ObjectiveScores,
        tag_versions: BTreeMap<TagId, u64>,
    ) -> Self {
        let target_tags = action.target_tags();
        Self {
            id: Uuid::now_v7(),
            origin_node_id,
            target_tags,
            action,
            predicted_effect: None,
            risk_score: risk_score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            objective_scores,
            tag_versions,
            created_at: Utc::now(),
        }
    }

    pub fn with_predicted_effect(mut self, effect: PredictedEffect) -> Self {
        self.predicted_effect = Some(effect);
        self
    }

    /// True when this proposal contends for any of the same tags.
    pub fn overlaps(&self, other: &Proposal) -> bool {
        self.target_tags.intersection(&other.target_tags).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(node: &str, tags: &[&str]) -> Proposal {
        let writes = tags.iter().map(|t| TagWrite::new(*t, 1.0)).collect();
        Proposal::new(
            NodeId::from(node),
            ControlAction::new("test", writes),
            0.1,
            0.9,
            ObjectiveScores::default(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_target_tags_derived_from_writes() {
        let p = proposal("n1", &["A", "B", "A"]);
        assert_eq!(p.target_tags.len(), 2);
    }

    #[test]
    fn test_overlap() {
        let a = proposal("n1", &["A", "B"]);
        let b = proposal("n2", &["B", "C"]);
        let c = proposal("n3", &["D"]);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_risk_and_confidence_clamped() {
        let p = Proposal::new(
            NodeId::from("n1"),
            ControlAction::single("t", "A", 1.0),
            3.0,
            -1.0,
            ObjectiveScores::default(),
            BTreeMap::new(),
        );
        assert_eq!(p.risk_score, 1.0);
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn test_default_weights_safety_dominates() {
        let w = ObjectiveWeights::default();
        // A unit safety regression must outweigh full-scale wins elsewhere.
        let safe = ObjectiveScores::new(1.0, 1.0, 0.0, 1.0);
        let unsafe_ = ObjectiveScores::new(0.0, 0.0, 1.0, 0.0);
        assert!(safe.weighted(&w) < unsafe_.weighted(&w));
    }
}
