//! # warden-verifier
//!
//! Audits a draft before the gate reconsiders it. Two signals combine into
//! the hallucination score:
//!
//! - **Semantic consistency** between the draft and the utterance it
//!   answers, measured as embedding cosine similarity. Token overlap
//!   (Jaccard) is only the degraded fallback when the embedder is
//!   unavailable; it is too weak to be the primary check.
//! - **Grounding**: claim markers in the draft without an anchor in the
//!   island's recent payloads add weight to the score.
//!
//! A self-reported upstream hallucination estimate can only raise the
//! score, never lower it.

#![deny(unsafe_code)]

use std::sync::Arc;
use tracing::debug;
use warden_sensor::embed::magnitude;
use warden_sensor::{cosine, Embedder, LexiconEmbedder};

/// Consistency floors per similarity method.
const COSINE_FLOOR: f64 = 0.30;
const JACCARD_FLOOR: f64 = 0.15;

/// Weight of the (1 − similarity) signal in the hallucination score.
const CONSISTENCY_WEIGHT: f64 = 0.5;

/// Added per unanchored claim marker, capped.
const CLAIM_WEIGHT: f64 = 0.15;
const CLAIM_CAP: f64 = 0.5;

/// A rewrite may not raise hallucination by more than this over the draft
/// it replaces.
const AMPLIFICATION_TOLERANCE: f64 = 0.1;

/// Phrases that assert more than the context can back.
const CLAIM_MARKERS: &[&str] = &[
    "according to",
    "studies show",
    "research shows",
    "experts say",
    "scientists say",
    "statistics prove",
    "guaranteed",
    "definitely",
    "certainly",
    "will always",
    "will never",
];

/// Verifier output for one draft.
#[derive(Clone, Debug)]
pub struct VerifyReport {
    pub hallucination: f64,
    pub consistent: bool,
    /// Audit checks passed / total: the V axis of POAV.
    pub verification_ratio: f64,
    pub details: Vec<String>,
}

/// Audits drafts against the conversation they belong to.
pub struct Verifier {
    embedder: Arc<dyn Embedder>,
}

impl Verifier {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Score a draft against the utterance it answers and the island's
    /// recent payload texts.
    pub async fn verify(&self, draft: &str, utterance: &str, anchors: &[String]) -> VerifyReport {
        let mut details = Vec::new();

        let (similarity, floor) = match self.similarity(draft, utterance).await {
            Some(cos) => (cos, COSINE_FLOOR),
            None => {
                details.push("token_overlap_fallback".to_string());
                (jaccard(draft, utterance), JACCARD_FLOOR)
            }
        };
        let consistent = similarity >= floor;
        if !consistent {
            details.push(format!("inconsistent: similarity {similarity:.3}"));
        }

        let claim_score = self.unanchored_claims(draft, anchors, &mut details);

        let hallucination =
            (CONSISTENCY_WEIGHT * (1.0 - similarity.clamp(0.0, 1.0)) + claim_score).clamp(0.0, 1.0);

        let checks_passed = consistent as u32 + (claim_score == 0.0) as u32;
        let verification_ratio = f64::from(checks_passed) / 2.0;

        debug!(
            similarity,
            hallucination, consistent, verification_ratio, "draft verified"
        );

        VerifyReport {
            hallucination,
            consistent,
            verification_ratio,
            details,
        }
    }

    /// Fold in the upstream's self-reported estimate: it can only raise
    /// the score.
    pub fn with_self_report(mut report: VerifyReport, self_reported: Option<f64>) -> VerifyReport {
        if let Some(h) = self_reported {
            report.hallucination = report.hallucination.max(h.clamp(0.0, 1.0));
        }
        report
    }

    /// True when a rewrite raised hallucination beyond tolerance: the
    /// rewrite made things worse and should be treated as a failed attempt.
    pub fn amplified(previous_hallucination: f64, rewritten_hallucination: f64) -> bool {
        rewritten_hallucination - previous_hallucination > AMPLIFICATION_TOLERANCE
    }

    /// Embedding cosine similarity; `None` when the embedder fails or
    /// either side embeds to zero, in which case the caller falls back to
    /// token overlap.
    async fn similarity(&self, draft: &str, utterance: &str) -> Option<f64> {
        let draft_vec = self.embedder.embed(draft).await.ok()?;
        let utterance_vec = self.embedder.embed(utterance).await.ok()?;
        if magnitude(&draft_vec) == 0.0 || magnitude(&utterance_vec) == 0.0 {
            return None;
        }
        Some(cosine(&draft_vec, &utterance_vec).clamp(0.0, 1.0))
    }

    fn unanchored_claims(&self, draft: &str, anchors: &[String], details: &mut Vec<String>) -> f64 {
        let draft_lower = draft.to_lowercase();
        let mut score: f64 = 0.0;
        for marker in CLAIM_MARKERS {
            if !draft_lower.contains(marker) {
                continue;
            }
            let anchored = anchors
                .iter()
                .any(|a| a.to_lowercase().contains(marker));
            if !anchored {
                details.push(format!("unanchored claim: \"{marker}\""));
                score += CLAIM_WEIGHT;
            }
        }
        score.min(CLAIM_CAP)
    }
}

/// Token-set Jaccard overlap. Degraded fallback only.
fn jaccard(a: &str, b: &str) -> f64 {
    let ta: std::collections::HashSet<String> =
        LexiconEmbedder::tokenize(a).into_iter().collect();
    let tb: std::collections::HashSet<String> =
        LexiconEmbedder::tokenize(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_constitution::{Constitution, ConstitutionSnapshot};
    use warden_sensor::{SensorError, Vector};

    fn verifier() -> Verifier {
        let snapshot = ConstitutionSnapshot::seal(Constitution::baseline()).unwrap();
        Verifier::new(Arc::new(LexiconEmbedder::from_snapshot(&snapshot)))
    }

    struct DeadEmbedder;

    #[async_trait]
    impl Embedder for DeadEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vector, SensorError> {
            Err(SensorError::EmbedderUnavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn faithful_echo_scores_clean() {
        let report = verifier()
            .verify(
                "Regarding \"thanks for the help\": happy to help.",
                "thanks for the help",
                &[],
            )
            .await;
        assert!(report.consistent);
        assert!(report.hallucination < 0.3, "was {}", report.hallucination);
        assert_eq!(report.verification_ratio, 1.0);
    }

    #[tokio::test]
    async fn unanchored_claims_raise_hallucination() {
        let with_claims = verifier()
            .verify(
                "According to studies show this is definitely guaranteed. thanks",
                "thanks",
                &[],
            )
            .await;
        let without = verifier().verify("thanks, happy to help", "thanks", &[]).await;
        assert!(with_claims.hallucination > without.hallucination);
        assert!(with_claims
            .details
            .iter()
            .any(|d| d.contains("unanchored claim")));
        assert!(with_claims.verification_ratio < 1.0);
    }

    #[tokio::test]
    async fn anchored_claims_do_not_count() {
        let anchors = vec!["the report said: according to the 2019 census".to_string()];
        let report = verifier()
            .verify("according to the census, thanks", "thanks", &anchors)
            .await;
        assert!(!report.details.iter().any(|d| d.contains("unanchored")));
    }

    #[tokio::test]
    async fn dead_embedder_falls_back_to_token_overlap() {
        let verifier = Verifier::new(Arc::new(DeadEmbedder));
        let report = verifier
            .verify(
                "thanks for the help with the garden",
                "thanks for the help",
                &[],
            )
            .await;
        assert!(report
            .details
            .iter()
            .any(|d| d == "token_overlap_fallback"));
        assert!(report.consistent);
    }

    #[tokio::test]
    async fn unrelated_draft_is_inconsistent() {
        let report = verifier()
            .verify("random banana nonsense gibberish", "I love peace and thanks", &[])
            .await;
        assert!(!report.consistent);
        assert!(report.hallucination > 0.3);
    }

    #[tokio::test]
    async fn self_report_only_raises() {
        let base = verifier().verify("thanks, happy to help", "thanks", &[]).await;
        let raised = Verifier::with_self_report(base.clone(), Some(0.9));
        assert_eq!(raised.hallucination, 0.9);
        let not_lowered = Verifier::with_self_report(base.clone(), Some(0.0));
        assert_eq!(not_lowered.hallucination, base.hallucination);
    }

    #[test]
    fn amplification_guard_uses_tolerance() {
        assert!(!Verifier::amplified(0.3, 0.35));
        assert!(Verifier::amplified(0.3, 0.45));
        assert!(!Verifier::amplified(0.3, 0.25));
    }
}
