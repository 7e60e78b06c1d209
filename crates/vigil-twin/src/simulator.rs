//! Proposal simulation

use crate::model::ProcessModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use vigil_common::{PredictedEffect, Proposal, SimulationError, TagSnapshot};

/// Outcome of replaying one proposal against the process model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub predicted_effect: PredictedEffect,
    /// Worst-case risk across all writes, in [0, 1]
    pub predicted_risk: f64,
    /// Weakest confidence across all writes, in [0, 1]
    pub confidence: f64,
}

/// Stateless simulator over a pluggable process model
pub struct Simulator {
    model: Arc<dyn ProcessModel>,
}

impl Simulator {
    pub fn new(model: Arc<dyn ProcessModel>) -> Self {
        Self { model }
    }

    /// Replay a proposal against the model.
    ///
    /// Operates on the supplied snapshot copy only; neither tag nor node
    /// state is touched.
    #[instrument(skip(self, proposal, snapshot), fields(proposal = %proposal.id))]
    pub fn simulate(
        &self,
        proposal: &Proposal,
        snapshot: &TagSnapshot,
    ) -> Result<SimulationResult, SimulationError> {
        let mut deltas = BTreeMap::new();
        let mut worst_risk: f64 = 0.0;
        let mut weakest_confidence: f64 = 1.0;

        for write in &proposal.action.writes {
            let resp = self.model.respond(write, snapshot)?;
            deltas.insert(write.tag_id.clone(), resp.delta);
            worst_risk = worst_risk.max(resp.risk);
            weakest_confidence = weakest_confidence.min(resp.confidence);
        }

        Ok(SimulationResult {
            predicted_effect: PredictedEffect::new(deltas),
            predicted_risk: worst_risk,
            confidence: weakest_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FirstOrderModel, FirstOrderParams};
    use chrono::Utc;
    use std::collections::HashMap;
    use vigil_common::{
        ControlAction, NodeId, ObjectiveScores, Tag, TagId, TagQuality, TagValue, TagWrite,
    };

    fn snapshot(values: &[(&str, f64)]) -> TagSnapshot {
        let mut tags = HashMap::new();
        for (id, value) in values {
            tags.insert(
                TagId::from(*id),
                Tag {
                    id: TagId::from(*id),
                    value: TagValue::Float(*value),
                    quality: TagQuality::Good,
                    timestamp: Utc::now(),
                    version: 1,
                },
            );
        }
        TagSnapshot::new(tags)
    }

    fn model() -> FirstOrderModel {
        let params = FirstOrderParams {
            gain: 1.0,
            time_constant_s: 5.0,
            horizon_s: 60.0,
            low_limit: 0.0,
            high_limit: 100.0,
        };
        FirstOrderModel::default()
            .with_tag("A", params)
            .with_tag("B", params)
    }

    #[test]
    fn test_multi_write_takes_worst_risk() {
        let sim = Simulator::new(Arc::new(model()));
        let proposal = Proposal::new(
            NodeId::from("n1"),
            ControlAction::new(
                "adjust both",
                vec![TagWrite::new("A", 55.0), TagWrite::new("B", 98.0)],
            ),
            0.8,
            0.9,
            ObjectiveScores::default(),
            Default::default(),
        );
        let snap = snapshot(&[("A", 50.0), ("B", 50.0)]);
        let result = sim.simulate(&proposal, &snap).unwrap();
        assert_eq!(result.predicted_effect.deltas.len(), 2);
        // B lands near its high limit, dominating the risk estimate.
        assert!(result.predicted_risk > 0.8);
    }

    #[test]
    fn test_missing_model_propagates() {
        let sim = Simulator::new(Arc::new(FirstOrderModel::default()));
        let proposal = Proposal::new(
            NodeId::from("n1"),
            ControlAction::single("adjust", "A", 55.0),
            0.8,
            0.9,
            ObjectiveScores::default(),
            Default::default(),
        );
        let snap = snapshot(&[("A", 50.0)]);
        assert!(sim.simulate(&proposal, &snap).is_err());
    }
}
