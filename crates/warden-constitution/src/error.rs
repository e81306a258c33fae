use thiserror::Error;
use warden_types::poav::PoavWeightError;

/// Errors from constitution validation and loading.
#[derive(Debug, Error)]
pub enum ConstitutionError {
    #[error("threshold {name} out of range: {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("no P0 rules defined; the hard-block tier cannot be empty")]
    EmptyP0Rules,

    #[error("poav_pass ({pass}) must exceed poav_rewrite_floor ({floor})")]
    BandInversion { pass: f64, floor: f64 },

    #[error("rewrite budget must be at least 1, got {0}")]
    InvalidRewriteBudget(u32),

    #[error("rollback limit must be at least 1, got {0}")]
    InvalidRollbackLimit(u32),

    #[error("rule {rule} references unknown domain {domain}")]
    UnknownRuleDomain { rule: String, domain: String },

    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("domain {name} has invalid weight {weight}")]
    InvalidDomainWeight { name: String, weight: f64 },

    #[error("version {offered} is not newer than active version {current}")]
    NonMonotonicVersion { current: u64, offered: u64 },

    #[error(transparent)]
    Weights(#[from] PoavWeightError),

    #[error("failed to read constitution file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse constitution file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to canonicalize constitution: {0}")]
    Canonicalize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_context() {
        let err = ConstitutionError::NonMonotonicVersion {
            current: 4,
            offered: 3,
        };
        assert!(err.to_string().contains("not newer"));

        let err = ConstitutionError::UnknownRuleDomain {
            rule: "harm".into(),
            domain: "ghost".into(),
        };
        assert!(err.to_string().contains("ghost"));
    }
}
