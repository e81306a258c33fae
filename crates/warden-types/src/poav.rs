//! POAV — the unified decision score

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far the weight sum may deviate from 1.0 before a bundle is rejected.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weights for the four POAV sub-scores. Carried by the constitution
/// snapshot; the gate and spine never bake these in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoavWeights {
    /// Precision — weight on (1 − hallucination).
    pub precision: f64,
    /// Observation — weight on (1 − drift).
    pub observation: f64,
    /// Avoidance — weight on (1 − risk).
    pub avoidance: f64,
    /// Verification — weight on the audit pass rate.
    pub verification: f64,
}

impl Default for PoavWeights {
    fn default() -> Self {
        Self {
            precision: 0.25,
            observation: 0.25,
            avoidance: 0.30,
            verification: 0.20,
        }
    }
}

impl PoavWeights {
    /// Check that every weight is in [0, 1] and the sum is 1.
    pub fn validate(&self) -> Result<(), PoavWeightError> {
        for (name, w) in [
            ("precision", self.precision),
            ("observation", self.observation),
            ("avoidance", self.avoidance),
            ("verification", self.verification),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(PoavWeightError::OutOfRange {
                    axis: name,
                    value: w,
                });
            }
        }

        let sum = self.precision + self.observation + self.avoidance + self.verification;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PoavWeightError::BadSum { sum });
        }
        Ok(())
    }

    /// Weighted POAV score, clamped to [0, 1].
    pub fn score(&self, inputs: &PoavInputs) -> f64 {
        let precision = 1.0 - inputs.hallucination.clamp(0.0, 1.0);
        let observation = 1.0 - inputs.drift.clamp(0.0, 1.0);
        let avoidance = 1.0 - inputs.risk.clamp(0.0, 1.0);
        let verification = inputs.verification.clamp(0.0, 1.0);

        (self.precision * precision
            + self.observation * observation
            + self.avoidance * avoidance
            + self.verification * verification)
            .clamp(0.0, 1.0)
    }
}

/// Per-decision inputs to the POAV score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoavInputs {
    pub hallucination: f64,
    pub drift: f64,
    pub risk: f64,
    /// Audit pass rate (checks passed / total).
    pub verification: f64,
}

impl PoavInputs {
    /// Inputs for the pre-draft estimate: nothing generated yet, so
    /// hallucination is 0 and the audit rate is 1.
    pub fn estimate(drift: f64, risk: f64) -> Self {
        Self {
            hallucination: 0.0,
            drift,
            risk,
            verification: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoavWeightError {
    #[error("poav weight {axis} out of range: {value}")]
    OutOfRange { axis: &'static str, value: f64 },

    #[error("poav weights must sum to 1.0, got {sum}")]
    BadSum { sum: f64 },
}
