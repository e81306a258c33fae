//! The per-utterance state triple

use serde::{Deserialize, Serialize};

/// The (T, S, R) state triple computed per utterance.
///
/// All axes are clamped to [0, 1]. Field names serialize as `T`/`S`/`R` so
/// the in-memory form matches the persisted ledger contract byte for byte.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Tension — urgency/stress proxy derived from lexical markers.
    #[serde(rename = "T")]
    pub tension: f64,

    /// Drift — semantic distance from the active context baseline.
    #[serde(rename = "S")]
    pub drift: f64,

    /// Risk — proximity to policy-governed domains.
    #[serde(rename = "R")]
    pub risk: f64,
}

impl Triple {
    /// Build a triple, clamping every axis to [0, 1].
    pub fn new(tension: f64, drift: f64, risk: f64) -> Self {
        Self {
            tension: tension.clamp(0.0, 1.0),
            drift: drift.clamp(0.0, 1.0),
            risk: risk.clamp(0.0, 1.0),
        }
    }

    /// The neutral triple returned when the sensor cannot observe.
    ///
    /// Unknown input is innocent until proven: drift is 0 here, never 1.
    pub fn neutral() -> Self {
        Self {
            tension: 0.0,
            drift: 0.0,
            risk: 0.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.tension == 0.0 && self.drift == 0.0 && self.risk == 0.0
    }
}

impl Default for Triple {
    fn default() -> Self {
        Self::neutral()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_to_unit_interval() {
        let t = Triple::new(-0.3, 1.7, 0.5);
        assert_eq!(t.tension, 0.0);
        assert_eq!(t.drift, 1.0);
        assert_eq!(t.risk, 0.5);
    }

    #[test]
    fn neutral_is_all_zero() {
        assert!(Triple::neutral().is_neutral());
        assert!(!Triple::new(0.0, 0.1, 0.0).is_neutral());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let t = Triple::new(0.25, 0.5, 0.75);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["T"], 0.25);
        assert_eq!(json["S"], 0.5);
        assert_eq!(json["R"], 0.75);
    }
}
