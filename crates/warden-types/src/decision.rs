//! Gate decisions

use crate::triple::Triple;
use serde::{Deserialize, Serialize};

/// The three-way gate outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    Pass,
    Rewrite,
    Block,
}

impl std::fmt::Display for GateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateAction::Pass => write!(f, "PASS"),
            GateAction::Rewrite => write!(f, "REWRITE"),
            GateAction::Block => write!(f, "BLOCK"),
        }
    }
}

/// Scores at the moment a decision was taken.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub triple: Triple,
    pub poav: f64,
    pub hallucination: f64,
}

/// A gate decision with its structured reason.
///
/// `rule` is the triggered rule id (`p0:<id>`, `critical:risk`,
/// `poav:band`, …) and `threshold` names the constitution threshold that
/// fired, when one did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    pub scores: ScoreSnapshot,
    /// Hint that a human should review this interaction.
    #[serde(default)]
    pub escalate: bool,
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        self.action == GateAction::Pass
    }

    pub fn is_block(&self) -> bool {
        self.action == GateAction::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ScoreSnapshot {
        ScoreSnapshot {
            triple: Triple::new(0.1, 0.2, 0.3),
            poav: 0.8,
            hallucination: 0.1,
        }
    }

    #[test]
    fn action_serializes_screaming() {
        let json = serde_json::to_string(&GateAction::Rewrite).unwrap();
        assert_eq!(json, "\"REWRITE\"");
    }

    #[test]
    fn decision_round_trips() {
        let decision = GateDecision {
            action: GateAction::Block,
            rule: "p0:harm".into(),
            threshold: None,
            scores: snapshot(),
            escalate: true,
        };

        let json = serde_json::to_string(&decision).unwrap();
        let back: GateDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decision);
        assert!(back.is_block());
    }

    #[test]
    fn threshold_omitted_when_absent() {
        let decision = GateDecision {
            action: GateAction::Pass,
            rule: "poav:band".into(),
            threshold: None,
            scores: snapshot(),
            escalate: false,
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("threshold"));
    }
}
