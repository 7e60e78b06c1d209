//! Process models
//!
//! A model predicts, per written tag, where the process settles over the
//! prediction horizon and how close that lands to the operating limits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_common::{SimulationError, TagId, TagQuality, TagSnapshot, TagWrite};

/// Per-write prediction produced by a model
#[derive(Debug, Clone, Copy)]
pub struct WriteResponse {
    /// Expected value delta over the horizon
    pub delta: f64,
    /// Risk contribution in [0, 1], monotone in limit proximity
    pub risk: f64,
    /// Model confidence for this write, in [0, 1]
    pub confidence: f64,
}

/// Pluggable process model behind the simulator
pub trait ProcessModel: Send + Sync {
    /// Predict the response to a single write given the current snapshot.
    fn respond(&self, write: &TagWrite, snapshot: &TagSnapshot) -> Result<WriteResponse, SimulationError>;
}

/// First-order (gain + time constant) response parameters for one tag
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FirstOrderParams {
    /// Steady-state gain from written value to process value
    pub gain: f64,
    /// Time constant in seconds
    pub time_constant_s: f64,
    /// Prediction horizon in seconds
    pub horizon_s: f64,
    /// Operating limits; predictions outside them score full risk
    pub low_limit: f64,
    pub high_limit: f64,
}

impl FirstOrderParams {
    fn range(&self) -> f64 {
        (self.high_limit - self.low_limit).max(f64::EPSILON)
    }
}

/// Configuration-supplied first-order model, one parameter set per tag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirstOrderModel {
    params: HashMap<TagId, FirstOrderParams>,
}

impl FirstOrderModel {
    pub fn new(params: HashMap<TagId, FirstOrderParams>) -> Self {
        Self { params }
    }

    pub fn with_tag(mut self, tag: impl Into<TagId>, params: FirstOrderParams) -> Self {
        self.params.insert(tag.into(), params);
        self
    }
}

impl ProcessModel for FirstOrderModel {
    fn respond(&self, write: &TagWrite, snapshot: &TagSnapshot) -> Result<WriteResponse, SimulationError> {
        let params = self
            .params
            .get(&write.tag_id)
            .ok_or_else(|| SimulationError::NoModel(write.tag_id.to_string()))?;
        let target = write
            .value
            .as_f64()
            .ok_or_else(|| SimulationError::NonNumericWrite(write.tag_id.to_string()))?;
        let current = snapshot.value_f64(&write.tag_id).ok_or_else(|| {
            SimulationError::Failed(format!("tag {} missing from snapshot", write.tag_id))
        })?;

        // First-order step response toward the written value.
        let tau = params.time_constant_s.max(f64::EPSILON);
        let settle = 1.0 - (-params.horizon_s / tau).exp();
        let delta = params.gain * (target - current) * settle;
        let predicted = current + delta;

        // Risk grows monotonically as the prediction approaches either limit
        // and saturates at 1.0 outside the envelope.
        let half_range = params.range() / 2.0;
        let mid = (params.high_limit + params.low_limit) / 2.0;
        let excursion = (predicted - mid).abs() / half_range;
        let risk = excursion.clamp(0.0, 1.0);

        // Input quality degrades confidence; an Uncertain reading is a guess,
        // a Bad one is barely usable.
        let confidence = match snapshot.quality(&write.tag_id) {
            Some(TagQuality::Good) => 1.0,
            Some(TagQuality::Uncertain) => 0.6,
            Some(TagQuality::Bad) | None => 0.2,
        };

        Ok(WriteResponse {
            delta,
            risk,
            confidence,
        })
    }
}
