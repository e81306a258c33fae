//! # warden-gate
//!
//! The decision gate: maps `(τ, scores, snapshot)` to PASS / REWRITE /
//! BLOCK. Stateless given a snapshot: the same inputs always produce the
//! same decision, which is what makes the ledger's decision records
//! replayable.
//!
//! Policy, evaluated top to bottom, first match wins:
//!
//! 1. P0 hard block — a P0 rule's domain presence at or above its floor
//!    blocks outright, whatever the other scores say.
//! 2. Critical-threshold override — a single dangerous axis (risk or
//!    hallucination) forces REWRITE even when the POAV average looks fine.
//! 3. Unparseable input — REWRITE to ask for something readable.
//! 4. POAV band — pass / rewrite / block by aggregate score.
//! 5. De-escalation — a band PASS under high tension becomes a rewrite.
//! 6. Degraded tightening — with a degraded sensor, rewrites promote to
//!    BLOCK at half the critical risk threshold.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use tracing::debug;
use warden_constitution::ConstitutionSnapshot;
use warden_types::{GateAction, GateDecision, ScoreSnapshot, Triple};

/// Escalation heuristic: very low POAV together with elevated risk.
const ESCALATE_POAV: f64 = 0.2;
const ESCALATE_RISK: f64 = 0.5;

/// Everything the gate reads for one decision.
#[derive(Clone, Debug)]
pub struct GateInput<'a> {
    pub triple: Triple,
    pub poav: f64,
    pub hallucination: f64,
    /// Per-domain presence from the sensor, for P0 floor checks.
    pub domain_presence: &'a BTreeMap<String, f64>,
    /// Sensor could not fully observe; thresholds tighten.
    pub degraded: bool,
    /// Input had no extractable tokens.
    pub unparseable: bool,
}

/// The decision gate. Carries no state of its own.
pub struct Gate;

impl Gate {
    /// Decide one utterance or draft against the snapshot.
    pub fn decide(snapshot: &ConstitutionSnapshot, input: &GateInput<'_>) -> GateDecision {
        let scores = ScoreSnapshot {
            triple: input.triple,
            poav: input.poav,
            hallucination: input.hallucination,
        };
        let escalate = input.poav < ESCALATE_POAV && input.triple.risk > ESCALATE_RISK;
        let thresholds = snapshot.thresholds();

        // 1. P0 hard constraints. Ties break to the lexicographically
        //    smallest rule id so audits are stable.
        for rule in snapshot.p0_rules() {
            let floor = snapshot
                .domain(&rule.domain)
                .map(|d| d.presence_floor)
                .unwrap_or(1.0);
            let presence = input
                .domain_presence
                .get(&rule.domain)
                .copied()
                .unwrap_or(0.0);
            if presence >= floor {
                debug!(rule = %rule.id, presence, floor, "P0 rule fired");
                return GateDecision {
                    action: GateAction::Block,
                    rule: format!("p0:{}", rule.id),
                    threshold: Some("presence_floor".into()),
                    scores,
                    escalate: true,
                };
            }
        }

        // 2. Critical-threshold override: one bad axis cannot hide behind
        //    a good average. Both axes firing name both, in fixed order.
        let risk_critical = input.triple.risk >= thresholds.risk_critical;
        let halluc_critical = input.hallucination >= thresholds.halluc_critical;
        if risk_critical || halluc_critical {
            let (rule, threshold) = match (risk_critical, halluc_critical) {
                (true, true) => ("critical:risk,hallucination", "risk_critical"),
                (true, false) => ("critical:risk", "risk_critical"),
                (false, true) => ("critical:hallucination", "halluc_critical"),
                (false, false) => unreachable!(),
            };
            let decision = GateDecision {
                action: GateAction::Rewrite,
                rule: rule.into(),
                threshold: Some(threshold.into()),
                scores,
                escalate,
            };
            return Self::tighten_if_degraded(snapshot, input, decision);
        }

        // 3. Input the sensor could not parse.
        if input.unparseable {
            let decision = GateDecision {
                action: GateAction::Rewrite,
                rule: "unparseable_input".into(),
                threshold: None,
                scores,
                escalate,
            };
            return Self::tighten_if_degraded(snapshot, input, decision);
        }

        // 4. POAV band.
        if input.poav >= thresholds.poav_pass {
            // 5. A band pass under high tension still de-escalates first.
            if input.triple.tension >= thresholds.tension_deescalate {
                let decision = GateDecision {
                    action: GateAction::Rewrite,
                    rule: "deescalate:tension".into(),
                    threshold: Some("tension_deescalate".into()),
                    scores,
                    escalate,
                };
                return Self::tighten_if_degraded(snapshot, input, decision);
            }
            GateDecision {
                action: GateAction::Pass,
                rule: "poav:pass".into(),
                threshold: Some("poav_pass".into()),
                scores,
                escalate: false,
            }
        } else if input.poav >= thresholds.poav_rewrite_floor {
            let decision = GateDecision {
                action: GateAction::Rewrite,
                rule: "poav:band".into(),
                threshold: Some("poav_rewrite_floor".into()),
                scores,
                escalate,
            };
            Self::tighten_if_degraded(snapshot, input, decision)
        } else {
            GateDecision {
                action: GateAction::Block,
                rule: "poav:floor".into(),
                threshold: Some("poav_rewrite_floor".into()),
                scores,
                escalate,
            }
        }
    }

    /// Step 6: with a degraded sensor reading, a REWRITE promotes to BLOCK
    /// once risk reaches half the critical threshold.
    fn tighten_if_degraded(
        snapshot: &ConstitutionSnapshot,
        input: &GateInput<'_>,
        decision: GateDecision,
    ) -> GateDecision {
        if decision.action == GateAction::Rewrite
            && input.degraded
            && input.triple.risk >= snapshot.thresholds().risk_critical / 2.0
        {
            debug!(rule = %decision.rule, "degraded sensor promoted rewrite to block");
            return GateDecision {
                action: GateAction::Block,
                rule: format!("degraded:{}", decision.rule),
                threshold: decision.threshold,
                scores: decision.scores,
                escalate: decision.escalate,
            };
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_constitution::{Constitution, PolicyRule, Priority};

    fn snapshot() -> ConstitutionSnapshot {
        ConstitutionSnapshot::seal(Constitution::baseline()).unwrap()
    }

    fn input<'a>(
        presence: &'a BTreeMap<String, f64>,
        triple: Triple,
        poav: f64,
        hallucination: f64,
    ) -> GateInput<'a> {
        GateInput {
            triple,
            poav,
            hallucination,
            domain_presence: presence,
            degraded: false,
            unparseable: false,
        }
    }

    #[test]
    fn clean_input_passes() {
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.05, 0.0), 0.9, 0.05),
        );
        assert_eq!(decision.action, GateAction::Pass);
        assert_eq!(decision.rule, "poav:pass");
    }

    #[test]
    fn p0_blocks_regardless_of_scores() {
        let mut presence = BTreeMap::new();
        presence.insert("harm".to_string(), 0.4);
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.0, 0.0, 0.4), 0.99, 0.0),
        );
        assert_eq!(decision.action, GateAction::Block);
        assert_eq!(decision.rule, "p0:harm");
        assert!(decision.escalate);
    }

    #[test]
    fn p0_tie_breaks_to_smallest_rule_id() {
        let mut constitution = Constitution::baseline();
        constitution.rules.push(PolicyRule {
            id: "assault".into(),
            priority: Priority::P0,
            domain: "harm".into(),
            description: String::new(),
        });
        let snapshot = ConstitutionSnapshot::seal(constitution).unwrap();

        let mut presence = BTreeMap::new();
        presence.insert("harm".to_string(), 0.9);
        let decision = Gate::decide(
            &snapshot,
            &input(&presence, Triple::new(0.0, 0.0, 0.9), 0.1, 0.0),
        );
        assert_eq!(decision.rule, "p0:assault");
    }

    #[test]
    fn critical_risk_overrides_high_poav() {
        // The masked-axis regression: average says pass, risk axis says no.
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.05, 0.80), 0.77, 0.0),
        );
        assert_eq!(decision.action, GateAction::Rewrite);
        assert_eq!(decision.rule, "critical:risk");
        assert_eq!(decision.threshold.as_deref(), Some("risk_critical"));
    }

    #[test]
    fn critical_hallucination_overrides_high_poav() {
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.05, 0.1), 0.75, 0.65),
        );
        assert_eq!(decision.action, GateAction::Rewrite);
        assert_eq!(decision.rule, "critical:hallucination");
    }

    #[test]
    fn both_critical_axes_name_both_in_fixed_order() {
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.05, 0.85), 0.5, 0.7),
        );
        assert_eq!(decision.rule, "critical:risk,hallucination");
    }

    #[test]
    fn critical_never_passes_whatever_poav_says() {
        let presence = BTreeMap::new();
        for poav in [0.0, 0.5, 0.99, 1.0] {
            let decision = Gate::decide(
                &snapshot(),
                &input(&presence, Triple::new(0.0, 0.0, 0.95), poav, 0.0),
            );
            assert_ne!(decision.action, GateAction::Pass, "poav {poav}");
        }
    }

    #[test]
    fn poav_band_rewrites_and_blocks() {
        let presence = BTreeMap::new();
        let mid = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.3, 0.1), 0.5, 0.2),
        );
        assert_eq!(mid.action, GateAction::Rewrite);
        assert_eq!(mid.rule, "poav:band");

        let low = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.1, 0.3, 0.1), 0.2, 0.2),
        );
        assert_eq!(low.action, GateAction::Block);
        assert_eq!(low.rule, "poav:floor");
    }

    #[test]
    fn high_tension_pass_becomes_deescalation_rewrite() {
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.85, 0.0, 0.0), 0.85, 0.0),
        );
        assert_eq!(decision.action, GateAction::Rewrite);
        assert_eq!(decision.rule, "deescalate:tension");
    }

    #[test]
    fn degraded_sensor_promotes_rewrite_to_block() {
        let presence = BTreeMap::new();
        let mut gate_input = input(&presence, Triple::new(0.1, 0.3, 0.45), 0.5, 0.2);
        gate_input.degraded = true;
        let decision = Gate::decide(&snapshot(), &gate_input);
        // risk 0.45 >= risk_critical/2 (0.40): the rewrite hardens.
        assert_eq!(decision.action, GateAction::Block);
        assert_eq!(decision.rule, "degraded:poav:band");
    }

    #[test]
    fn degraded_sensor_leaves_low_risk_rewrites_alone() {
        let presence = BTreeMap::new();
        let mut gate_input = input(&presence, Triple::new(0.1, 0.3, 0.2), 0.5, 0.2);
        gate_input.degraded = true;
        let decision = Gate::decide(&snapshot(), &gate_input);
        assert_eq!(decision.action, GateAction::Rewrite);
    }

    #[test]
    fn unparseable_input_rewrites() {
        let presence = BTreeMap::new();
        let mut gate_input = input(&presence, Triple::neutral(), 0.9, 0.0);
        gate_input.unparseable = true;
        let decision = Gate::decide(&snapshot(), &gate_input);
        assert_eq!(decision.action, GateAction::Rewrite);
        assert_eq!(decision.rule, "unparseable_input");
    }

    #[test]
    fn escalation_hint_on_low_poav_high_risk() {
        let presence = BTreeMap::new();
        let decision = Gate::decide(
            &snapshot(),
            &input(&presence, Triple::new(0.2, 0.3, 0.6), 0.15, 0.3),
        );
        assert_eq!(decision.action, GateAction::Block);
        assert!(decision.escalate);
    }
}
