//! Constitution data model and validation

use crate::error::ConstitutionError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use warden_types::PoavWeights;

/// Priority tiers for policy rules. P0 is the hard-block tier: a P0 hit
/// blocks regardless of every other score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

/// A single policy rule bound to a risk domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub priority: Priority,
    /// Name of the risk domain whose presence score this rule reads.
    pub domain: String,
    #[serde(default)]
    pub description: String,
}

/// A risk keyword domain with its scoring weight and the presence floor
/// above which its rules fire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskDomain {
    pub name: String,
    pub keywords: Vec<String>,
    /// Scalar weight applied to this domain's presence when computing R.
    pub weight: f64,
    /// Minimum presence for this domain's rules to fire.
    pub presence_floor: f64,
}

/// Decision thresholds, all in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// R at or above this forces REWRITE regardless of POAV.
    pub risk_critical: f64,
    /// Hallucination at or above this forces REWRITE regardless of POAV.
    pub halluc_critical: f64,
    /// POAV at or above this passes.
    pub poav_pass: f64,
    /// POAV below this blocks; between floor and pass rewrites.
    pub poav_rewrite_floor: f64,
    /// Tension at or above this turns a band PASS into a de-escalation
    /// rewrite.
    pub tension_deescalate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            risk_critical: 0.80,
            halluc_critical: 0.60,
            poav_pass: 0.70,
            poav_rewrite_floor: 0.30,
            tension_deescalate: 0.80,
        }
    }
}

/// The versioned policy bundle.
///
/// Loaded at startup (optionally from TOML) and hot-swappable between
/// utterances through [`crate::ConstitutionStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constitution {
    pub version: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub weights: PoavWeights,
    pub rules: Vec<PolicyRule>,
    pub domains: Vec<RiskDomain>,
    /// Maximum rewrite attempts per utterance (K).
    #[serde(default = "default_rewrite_budget")]
    pub rewrite_budget: u32,
    /// Consecutive rollbacks that trip the island breaker (L).
    #[serde(default = "default_rollback_limit")]
    pub rollback_limit: u32,
    /// Deterministic safe string emitted on BLOCK and fallback paths.
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
    /// Number of prior turns the sensor folds into its context baseline.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_rewrite_budget() -> u32 {
    3
}

fn default_rollback_limit() -> u32 {
    3
}

fn default_fallback_text() -> String {
    "I can't help with that request, but I'm glad to help with something safer.".to_string()
}

fn default_context_window() -> usize {
    6
}

impl Constitution {
    /// The built-in baseline bundle: the P0 harm tier plus the standard
    /// sensitive domains. Serves as version 1 when no file is provided.
    pub fn baseline() -> Self {
        Self {
            version: 1,
            thresholds: Thresholds::default(),
            weights: PoavWeights::default(),
            rules: vec![
                PolicyRule {
                    id: "harm".into(),
                    priority: Priority::P0,
                    domain: "harm".into(),
                    description: "Direct physical-harm content is never drafted".into(),
                },
                PolicyRule {
                    id: "cyber-abuse".into(),
                    priority: Priority::P1,
                    domain: "cyber".into(),
                    description: "Intrusion and malware assistance".into(),
                },
                PolicyRule {
                    id: "medical-advice".into(),
                    priority: Priority::P2,
                    domain: "medical".into(),
                    description: "Clinical guidance needs grounding".into(),
                },
                PolicyRule {
                    id: "financial-advice".into(),
                    priority: Priority::P3,
                    domain: "financial".into(),
                    description: "Speculative financial guidance".into(),
                },
            ],
            domains: vec![
                RiskDomain {
                    name: "harm".into(),
                    keywords: [
                        "kill", "murder", "bomb", "weapon", "explosive", "poison", "attack",
                    ]
                    .map(String::from)
                    .to_vec(),
                    weight: 1.0,
                    presence_floor: 0.30,
                },
                RiskDomain {
                    name: "cyber".into(),
                    keywords: ["hack", "malware", "exploit", "ransomware", "breach"]
                        .map(String::from)
                        .to_vec(),
                    weight: 0.8,
                    presence_floor: 0.50,
                },
                RiskDomain {
                    name: "medical".into(),
                    keywords: ["diagnosis", "prescription", "overdose", "dosage"]
                        .map(String::from)
                        .to_vec(),
                    weight: 0.7,
                    presence_floor: 0.50,
                },
                RiskDomain {
                    name: "financial".into(),
                    keywords: ["invest", "loan", "gamble", "bankruptcy"]
                        .map(String::from)
                        .to_vec(),
                    weight: 0.6,
                    presence_floor: 0.50,
                },
            ],
            rewrite_budget: default_rewrite_budget(),
            rollback_limit: default_rollback_limit(),
            fallback_text: default_fallback_text(),
            context_window: default_context_window(),
        }
    }

    /// Parse a constitution from TOML.
    pub fn from_toml(text: &str) -> Result<Self, ConstitutionError> {
        Ok(toml::from_str(text)?)
    }

    /// Validate the bundle. A bundle that fails validation must never
    /// become the active snapshot.
    pub fn validate(&self) -> Result<(), ConstitutionError> {
        let t = &self.thresholds;
        for (name, value) in [
            ("risk_critical", t.risk_critical),
            ("halluc_critical", t.halluc_critical),
            ("poav_pass", t.poav_pass),
            ("poav_rewrite_floor", t.poav_rewrite_floor),
            ("tension_deescalate", t.tension_deescalate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConstitutionError::ThresholdOutOfRange { name, value });
            }
        }

        if t.poav_pass <= t.poav_rewrite_floor {
            return Err(ConstitutionError::BandInversion {
                pass: t.poav_pass,
                floor: t.poav_rewrite_floor,
            });
        }

        self.weights.validate()?;

        if !self.rules.iter().any(|r| r.priority == Priority::P0) {
            return Err(ConstitutionError::EmptyP0Rules);
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConstitutionError::DuplicateRule(rule.id.clone()));
            }
            if !self.domains.iter().any(|d| d.name == rule.domain) {
                return Err(ConstitutionError::UnknownRuleDomain {
                    rule: rule.id.clone(),
                    domain: rule.domain.clone(),
                });
            }
        }

        for domain in &self.domains {
            if !(0.0..=1.0).contains(&domain.weight) {
                return Err(ConstitutionError::InvalidDomainWeight {
                    name: domain.name.clone(),
                    weight: domain.weight,
                });
            }
        }

        if self.rewrite_budget < 1 {
            return Err(ConstitutionError::InvalidRewriteBudget(self.rewrite_budget));
        }
        if self.rollback_limit < 1 {
            return Err(ConstitutionError::InvalidRollbackLimit(self.rollback_limit));
        }

        Ok(())
    }
}

/// An immutable, validated constitution with its content fingerprint.
#[derive(Clone, Debug)]
pub struct ConstitutionSnapshot {
    constitution: Constitution,
    fingerprint: String,
}

impl ConstitutionSnapshot {
    /// Validate a bundle and freeze it into a snapshot.
    pub fn seal(constitution: Constitution) -> Result<Self, ConstitutionError> {
        constitution.validate()?;
        let canonical = serde_json::to_string(&serde_json::to_value(&constitution)?)?;
        let digest = Sha256::digest(canonical.as_bytes());
        let fingerprint = format!("v{}-{}", constitution.version, &hex::encode(digest)[..16]);
        Ok(Self {
            constitution,
            fingerprint,
        })
    }

    pub fn version(&self) -> u64 {
        self.constitution.version
    }

    /// Content fingerprint `v<version>-<sha256 prefix>`, stable across
    /// identical bundles and recorded for audit correlation.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.constitution.thresholds
    }

    pub fn weights(&self) -> &PoavWeights {
        &self.constitution.weights
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.constitution.rules
    }

    /// P0 rules sorted by id, the tie-break order used for audit-stable
    /// blocking.
    pub fn p0_rules(&self) -> Vec<&PolicyRule> {
        let mut rules: Vec<_> = self
            .constitution
            .rules
            .iter()
            .filter(|r| r.priority == Priority::P0)
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub fn domains(&self) -> &[RiskDomain] {
        &self.constitution.domains
    }

    pub fn domain(&self, name: &str) -> Option<&RiskDomain> {
        self.constitution.domains.iter().find(|d| d.name == name)
    }

    pub fn rewrite_budget(&self) -> u32 {
        self.constitution.rewrite_budget
    }

    pub fn rollback_limit(&self) -> u32 {
        self.constitution.rollback_limit
    }

    pub fn fallback_text(&self) -> &str {
        &self.constitution.fallback_text
    }

    pub fn context_window(&self) -> usize {
        self.constitution.context_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_validates() {
        Constitution::baseline().validate().unwrap();
    }

    #[test]
    fn band_inversion_rejected() {
        let mut c = Constitution::baseline();
        c.thresholds.poav_pass = 0.3;
        c.thresholds.poav_rewrite_floor = 0.7;
        assert!(matches!(
            c.validate(),
            Err(ConstitutionError::BandInversion { .. })
        ));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut c = Constitution::baseline();
        c.thresholds.risk_critical = 1.2;
        assert!(matches!(
            c.validate(),
            Err(ConstitutionError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_p0_tier_rejected() {
        let mut c = Constitution::baseline();
        c.rules.retain(|r| r.priority != Priority::P0);
        assert!(matches!(c.validate(), Err(ConstitutionError::EmptyP0Rules)));
    }

    #[test]
    fn rule_with_unknown_domain_rejected() {
        let mut c = Constitution::baseline();
        c.rules.push(PolicyRule {
            id: "phantom".into(),
            priority: Priority::P1,
            domain: "no-such-domain".into(),
            description: String::new(),
        });
        assert!(matches!(
            c.validate(),
            Err(ConstitutionError::UnknownRuleDomain { .. })
        ));
    }

    #[test]
    fn zero_budget_rejected() {
        let mut c = Constitution::baseline();
        c.rewrite_budget = 0;
        assert!(matches!(
            c.validate(),
            Err(ConstitutionError::InvalidRewriteBudget(0))
        ));
    }

    #[test]
    fn snapshot_fingerprint_is_content_addressed() {
        let a = ConstitutionSnapshot::seal(Constitution::baseline()).unwrap();
        let b = ConstitutionSnapshot::seal(Constitution::baseline()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut changed = Constitution::baseline();
        changed.thresholds.poav_pass = 0.75;
        let c = ConstitutionSnapshot::seal(changed).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.fingerprint().starts_with("v1-"));
    }

    #[test]
    fn p0_rules_sorted_by_id() {
        let mut c = Constitution::baseline();
        c.rules.push(PolicyRule {
            id: "abuse".into(),
            priority: Priority::P0,
            domain: "harm".into(),
            description: String::new(),
        });
        let snapshot = ConstitutionSnapshot::seal(c).unwrap();
        let ids: Vec<_> = snapshot.p0_rules().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["abuse".to_string(), "harm".to_string()]);
    }

    #[test]
    fn parses_minimal_toml() {
        let text = r#"
            version = 2

            [[rules]]
            id = "harm"
            priority = "P0"
            domain = "harm"

            [[domains]]
            name = "harm"
            keywords = ["kill", "bomb"]
            weight = 1.0
            presence_floor = 0.3
        "#;
        let c = Constitution::from_toml(text).unwrap();
        c.validate().unwrap();
        assert_eq!(c.version, 2);
        assert_eq!(c.rewrite_budget, 3);
        assert_eq!(c.thresholds.poav_pass, 0.70);
    }
}
