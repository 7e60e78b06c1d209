//! Risk and objective scoring
//!
//! Small pure functions so the monotonicity contract is easy to test. All
//! inputs are normalized to [0, 1] before they get here.

use vigil_common::ObjectiveScores;

/// Monotone mapping from normalized projected deviation to risk
#[derive(Debug, Clone, Copy)]
pub struct RiskModel {
    /// Deviation at which risk saturates to 1.0
    pub saturation: f64,
}

impl Default for RiskModel {
    fn default() -> Self {
        Self { saturation: 1.0 }
    }
}

impl RiskModel {
    /// Risk in [0, 1], strictly increasing in deviation until saturation.
    pub fn risk(&self, normalized_deviation: f64) -> f64 {
        (normalized_deviation / self.saturation.max(f64::EPSILON)).clamp(0.0, 1.0)
    }
}

/// Maps one candidate move onto the four consensus objectives
///
/// Lower is better on every axis. `authority` is how much of the deviation
/// one corrective move is expected to remove.
#[derive(Debug, Clone, Copy)]
pub struct ObjectivePolicy {
    pub authority: f64,
}

impl Default for ObjectivePolicy {
    fn default() -> Self {
        Self { authority: 0.8 }
    }
}

impl ObjectivePolicy {
    /// Score a move given normalized deviation, normalized actuation
    /// magnitude, and the risk estimate for the move.
    pub fn score(&self, deviation: f64, actuation: f64, risk: f64) -> ObjectiveScores {
        let deviation = deviation.clamp(0.0, 1.0);
        let actuation = actuation.clamp(0.0, 1.0);
        ObjectiveScores {
            // Disorder expected to remain after the move
            entropy: deviation * (1.0 - self.authority.clamp(0.0, 1.0)),
            // Actuator travel is energy and wear
            cost: actuation,
            safety: risk.clamp(0.0, 1.0),
            // Off-setpoint operation is lost throughput
            productivity: deviation * 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_monotone() {
        let model = RiskModel::default();
        assert!(model.risk(0.2) < model.risk(0.6));
        assert!(model.risk(0.6) < model.risk(0.9));
        assert_eq!(model.risk(2.0), 1.0);
    }

    #[test]
    fn test_scores_bounded() {
        let policy = ObjectivePolicy::default();
        let scores = policy.score(5.0, 5.0, 5.0);
        assert!(scores.entropy <= 1.0);
        assert!(scores.cost <= 1.0);
        assert!(scores.safety <= 1.0);
        assert!(scores.productivity <= 1.0);
    }

    #[test]
    fn test_larger_deviation_scores_worse() {
        let policy = ObjectivePolicy::default();
        let small = policy.score(0.1, 0.1, 0.1);
        let large = policy.score(0.8, 0.1, 0.1);
        assert!(large.entropy > small.entropy);
        assert!(large.productivity > small.productivity);
    }
}
