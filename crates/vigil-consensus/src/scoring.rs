//! Deterministic scoring and ranking
//!
//! Given the same eligible proposals and the same weights, the same winner
//! comes out. The full ordering key is (weighted score, risk, created_at,
//! origin node id); every component is totally ordered so no two distinct
//! proposals ever compare equal.

use ordered_float::OrderedFloat;
use uuid::Uuid;
use vigil_common::{ObjectiveWeights, Proposal};

/// Rank proposals best-first by weighted aggregate score with the
/// deterministic tie-break chain. Returns each proposal with its score.
pub fn rank<'a>(
    proposals: impl IntoIterator<Item = &'a Proposal>,
    weights: &ObjectiveWeights,
) -> Vec<(&'a Proposal, f64)> {
    let mut scored: Vec<(&Proposal, f64)> = proposals
        .into_iter()
        .map(|p| (p, p.objective_scores.weighted(weights)))
        .collect();
    scored.sort_by_key(|(p, score)| {
        (
            OrderedFloat(*score),
            OrderedFloat(p.risk_score),
            p.created_at,
            p.origin_node_id.clone(),
        )
    });
    scored
}

/// What scoring concluded about a round's eligible proposals
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved { proposal_id: Uuid },
    /// Top two scores closer than the ambiguity margin
    Ambiguous { gap: f64 },
    /// Winner's own confidence below the minimum
    LowConfidence { confidence: f64 },
}

/// Decide among eligible proposals. Returns `None` when the slate is empty.
pub fn decide<'a>(
    eligible: impl IntoIterator<Item = &'a Proposal>,
    weights: &ObjectiveWeights,
    ambiguity_margin: f64,
    min_confidence: f64,
) -> Option<Verdict> {
    let ranked = rank(eligible, weights);
    let (winner, best_score) = ranked.first()?;

    if let Some((_, runner_up)) = ranked.get(1) {
        let gap = runner_up - best_score;
        if gap < ambiguity_margin {
            return Some(Verdict::Ambiguous { gap });
        }
    }
    if winner.confidence < min_confidence {
        return Some(Verdict::LowConfidence {
            confidence: winner.confidence,
        });
    }
    Some(Verdict::Approved {
        proposal_id: winner.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use vigil_common::{ControlAction, NodeId, ObjectiveScores};

    fn proposal(node: &str, scores: ObjectiveScores, risk: f64, confidence: f64) -> Proposal {
        Proposal::new(
            NodeId::from(node),
            ControlAction::single("test", "A", 1.0),
            risk,
            confidence,
            scores,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_lowest_weighted_score_wins() {
        let w = ObjectiveWeights::default();
        let good = proposal("n1", ObjectiveScores::new(0.1, 0.1, 0.1, 0.1), 0.2, 0.9);
        let bad = proposal("n2", ObjectiveScores::new(0.5, 0.5, 0.5, 0.5), 0.2, 0.9);

        match decide([&good, &bad], &w, 0.05, 0.5) {
            Some(Verdict::Approved { proposal_id }) => assert_eq!(proposal_id, good.id),
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_equal_scores_break_on_risk() {
        let w = ObjectiveWeights::default();
        let scores = ObjectiveScores::new(0.3, 0.3, 0.3, 0.3);
        let risky = proposal("n1", scores, 0.6, 0.9);
        let calm = proposal("n2", scores, 0.2, 0.9);

        let ranked = rank([&risky, &calm], &w);
        assert_eq!(ranked[0].0.id, calm.id);
    }

    #[test]
    fn test_risk_tie_breaks_on_created_at_then_node_id() {
        let w = ObjectiveWeights::default();
        let scores = ObjectiveScores::new(0.3, 0.3, 0.3, 0.3);
        let mut early = proposal("n2", scores, 0.2, 0.9);
        let mut late = proposal("n1", scores, 0.2, 0.9);
        let base = Utc::now();
        early.created_at = base;
        late.created_at = base + Duration::milliseconds(10);
        assert_eq!(rank([&late, &early], &w)[0].0.id, early.id);

        late.created_at = base;
        // Fully tied on score, risk, and time: smaller node id wins.
        assert_eq!(rank([&late, &early], &w)[0].0.id, late.id);
    }

    #[test]
    fn test_close_scores_are_ambiguous() {
        let w = ObjectiveWeights::default();
        let a = proposal("n1", ObjectiveScores::new(0.10, 0.1, 0.1, 0.1), 0.2, 0.9);
        let b = proposal("n2", ObjectiveScores::new(0.11, 0.1, 0.1, 0.1), 0.2, 0.9);

        match decide([&a, &b], &w, 0.05, 0.5) {
            Some(Verdict::Ambiguous { gap }) => assert!(gap < 0.05),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_low_confidence_winner_flagged() {
        let w = ObjectiveWeights::default();
        let a = proposal("n1", ObjectiveScores::new(0.1, 0.1, 0.1, 0.1), 0.2, 0.3);
        let b = proposal("n2", ObjectiveScores::new(0.9, 0.9, 0.9, 0.9), 0.2, 0.9);

        match decide([&a, &b], &w, 0.05, 0.5) {
            Some(Verdict::LowConfidence { confidence }) => assert!((confidence - 0.3).abs() < 1e-9),
            other => panic!("expected low confidence, got {other:?}"),
        }
    }

    #[test]
    fn test_deterministic_across_input_order() {
        let w = ObjectiveWeights::default();
        let a = proposal("n1", ObjectiveScores::new(0.2, 0.1, 0.1, 0.3), 0.4, 0.9);
        let b = proposal("n2", ObjectiveScores::new(0.1, 0.2, 0.1, 0.1), 0.3, 0.9);
        let c = proposal("n3", ObjectiveScores::new(0.3, 0.3, 0.2, 0.2), 0.5, 0.9);

        let forward = decide([&a, &b, &c], &w, 0.01, 0.5);
        let backward = decide([&c, &b, &a], &w, 0.01, 0.5);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_empty_slate_has_no_verdict() {
        let w = ObjectiveWeights::default();
        let empty: [&Proposal; 0] = [];
        assert_eq!(decide(empty, &w, 0.05, 0.5), None);
    }
}
