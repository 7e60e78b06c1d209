//! Default estimation capability: PID setpoint loops
//!
//! Each configured loop watches one process variable and proposes corrective
//! writes to one output tag when the deviation from setpoint leaves the
//! deadband. Learned loop statistics (EWMA deviation baseline, cycle counts,
//! last outputs) form the model state that gets checkpointed; the controllers
//! themselves are rebuilt from configuration on restore.

use crate::estimator::{EstimationContext, Estimator};
use crate::scoring::{ObjectivePolicy, RiskModel};
use pid::Pid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use vigil_common::{
    ControlAction, EstimationError, Proposal, TagId, TagQuality, TagWrite,
};

/// Static configuration of one PID loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidLoopSpec {
    pub name: String,
    pub pv_tag: TagId,
    pub output_tag: TagId,
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// No proposal while |setpoint - pv| stays inside this band
    pub deadband: f64,
    /// Engineering-unit span used to normalize deviations
    pub pv_span: f64,
}

impl PidLoopSpec {
    fn output_range(&self) -> f64 {
        (self.output_max - self.output_min).max(f64::EPSILON)
    }

    fn build_controller(&self) -> Pid<f64> {
        let limit = self.output_range();
        let mut controller = Pid::new(self.setpoint, limit);
        controller.p(self.kp, limit);
        controller.i(self.ki, limit);
        controller.d(self.kd, limit);
        controller
    }
}

/// Learned statistics for one loop; part of the checkpointed model state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStats {
    pub updates: u64,
    pub last_output: Option<f64>,
    /// EWMA of normalized |deviation|; the loop's learned noise baseline
    pub deviation_ewma: f64,
}

/// Serializable model state of the whole estimator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PidModelState {
    pub cycles: u64,
    pub loops: BTreeMap<String, LoopStats>,
}

struct LoopRuntime {
    spec: PidLoopSpec,
    controller: Pid<f64>,
}

/// PID-based estimator over a set of configured loops
pub struct PidEstimator {
    loops: Vec<LoopRuntime>,
    risk: RiskModel,
    policy: ObjectivePolicy,
    state: PidModelState,
}

impl PidEstimator {
    pub fn new(specs: Vec<PidLoopSpec>) -> Self {
        let loops = specs
            .into_iter()
            .map(|spec| LoopRuntime {
                controller: spec.build_controller(),
                spec,
            })
            .collect();
        Self {
            loops,
            risk: RiskModel::default(),
            policy: ObjectivePolicy::default(),
            state: PidModelState::default(),
        }
    }

    pub fn with_risk_model(mut self, risk: RiskModel) -> Self {
        self.risk = risk;
        self
    }

    pub fn state(&self) -> &PidModelState {
        &self.state
    }
}

impl Estimator for PidEstimator {
    fn estimate(&mut self, ctx: &EstimationContext<'_>) -> Result<Vec<Proposal>, EstimationError> {
        let mut proposals = Vec::new();
        self.state.cycles += 1;

        for lp in &mut self.loops {
            let spec = &lp.spec;
            let pv = ctx
                .snapshot
                .value_f64(&spec.pv_tag)
                .ok_or_else(|| EstimationError::MissingTag(spec.pv_tag.to_string()))?;
            let quality = ctx.snapshot.quality(&spec.pv_tag);

            if quality == Some(TagQuality::Bad) {
                // A dead sensor is the driver layer's problem; skip the loop
                // rather than failing the whole node.
                debug!(node = %ctx.node_id, loop_name = %spec.name, "pv quality Bad, loop skipped");
                continue;
            }

            let error = spec.setpoint - pv;
            let deviation = (error.abs() / spec.pv_span.max(f64::EPSILON)).min(1.0);

            let stats = self.state.loops.entry(spec.name.clone()).or_default();
            stats.updates += 1;
            stats.deviation_ewma = 0.9 * stats.deviation_ewma + 0.1 * deviation;

            if error.abs() <= spec.deadband {
                continue;
            }

            let correction = lp.controller.next_control_output(pv).output;
            let current_output = ctx
                .snapshot
                .value_f64(&spec.output_tag)
                .unwrap_or((spec.output_min + spec.output_max) / 2.0);
            let command = (current_output + correction).clamp(spec.output_min, spec.output_max);

            let actuation = (command - current_output).abs() / spec.output_range();
            let risk = self.risk.risk(deviation);
            let scores = self.policy.score(deviation, actuation, risk);
            let confidence = match quality {
                Some(TagQuality::Good) => 1.0,
                _ => 0.6,
            };

            let mut versions = BTreeMap::new();
            for tag in [&spec.pv_tag, &spec.output_tag] {
                if let Some(t) = ctx.snapshot.get(tag) {
                    versions.insert(tag.clone(), t.version);
                }
            }

            let action = ControlAction::new(
                format!(
                    "{}: drive {} toward setpoint {:.2}",
                    spec.name, spec.pv_tag, spec.setpoint
                ),
                vec![TagWrite::new(spec.output_tag.clone(), command)],
            );
            let proposal = Proposal::new(
                ctx.node_id.clone(),
                action,
                risk,
                confidence,
                scores,
                versions,
            );
            stats.last_output = Some(command);
            proposals.push(proposal);
        }

        Ok(proposals)
    }

    fn snapshot_state(&self) -> Result<Vec<u8>, EstimationError> {
        bincode::serialize(&self.state)
            .map_err(|e| EstimationError::InvalidState(e.to_string()))
    }

    fn restore_state(&mut self, blob: &[u8]) -> Result<(), EstimationError> {
        self.state = bincode::deserialize(blob)
            .map_err(|e| EstimationError::StateDecode(e.to_string()))?;
        Ok(())
    }
}
