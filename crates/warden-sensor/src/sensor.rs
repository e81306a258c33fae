//! The sensing pipeline: utterance + history → reading

use crate::embed::{cosine, magnitude, mean, Embedder, LexiconEmbedder, Vector};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use warden_constitution::ConstitutionSnapshot;
use warden_types::Triple;

/// Urgency cues feeding the tension axis.
const URGENCY_CUES: &[&str] = &[
    "now",
    "immediately",
    "urgent",
    "hurry",
    "asap",
    "emergency",
    "must",
    "demand",
];

/// Keyword-hit saturation: presence = min(1, hits * PRESENCE_STEP).
const PRESENCE_STEP: f64 = 0.4;

/// One prior exchange in the island.
#[derive(Clone, Debug)]
pub struct ContextTurn {
    pub user: String,
    pub response: String,
}

impl ContextTurn {
    fn text(&self) -> String {
        format!("{} {}", self.user, self.response)
    }
}

/// Sensor output for one utterance.
#[derive(Clone, Debug)]
pub struct SensorReading {
    pub triple: Triple,
    /// SHA-256 of the utterance text.
    pub fingerprint: String,
    /// SHA-256 of the sliding context window.
    pub baseline_digest: String,
    /// Saturating keyword density per risk domain, for P0 floor checks.
    pub domain_presence: BTreeMap<String, f64>,
    /// Set when the embedder failed or the utterance embeds to zero; the
    /// gate applies stricter thresholds.
    pub degraded: bool,
    /// Non-empty input with no extractable tokens.
    pub unparseable: bool,
}

#[derive(Clone, Debug)]
pub struct SensorConfig {
    pub embed_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            embed_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Computes `(τ, fingerprint, baseline_digest)` for an utterance.
pub struct Sensor {
    embedder: Arc<dyn Embedder>,
    config: SensorConfig,
}

impl Sensor {
    pub fn new(embedder: Arc<dyn Embedder>, config: SensorConfig) -> Self {
        Self { embedder, config }
    }

    /// Sense one utterance against the island's recent history.
    ///
    /// Deterministic given identical inputs and snapshot. Never fails:
    /// whatever the sensor cannot observe reads as neutral, with the
    /// degraded marker carrying the caveat to the gate.
    pub async fn sense(
        &self,
        utterance: &str,
        context: &[ContextTurn],
        snapshot: &ConstitutionSnapshot,
    ) -> SensorReading {
        let fingerprint = sha256_hex(utterance.as_bytes());
        let window: Vec<&ContextTurn> = context
            .iter()
            .rev()
            .take(snapshot.context_window())
            .collect();
        let baseline_digest = {
            let mut hasher = Sha256::new();
            for turn in window.iter().rev() {
                hasher.update(turn.text().as_bytes());
                hasher.update(b"\n");
            }
            hex::encode(hasher.finalize())
        };

        if utterance.trim().is_empty() {
            return SensorReading {
                triple: Triple::neutral(),
                fingerprint,
                baseline_digest,
                domain_presence: BTreeMap::new(),
                degraded: false,
                unparseable: false,
            };
        }

        let tokens = LexiconEmbedder::tokenize(utterance);
        if tokens.is_empty() {
            // Non-empty input with nothing the lexer can hold on to.
            return SensorReading {
                triple: Triple::neutral(),
                fingerprint,
                baseline_digest,
                domain_presence: BTreeMap::new(),
                degraded: false,
                unparseable: true,
            };
        }

        let domain_presence = domain_presence(&tokens, snapshot);
        let risk = snapshot
            .domains()
            .iter()
            .map(|d| d.weight * domain_presence.get(&d.name).copied().unwrap_or(0.0))
            .fold(0.0_f64, f64::max);

        let tension = tension_score(utterance, &tokens);

        let mut degraded = false;
        let drift = match self.embed_with_retry(utterance).await {
            Some(utterance_vec) if magnitude(&utterance_vec) == 0.0 => {
                // Zero embedding: the sensor cannot place this utterance,
                // which is a degraded observation, not maximal drift.
                degraded = true;
                0.0
            }
            Some(utterance_vec) => self.context_drift(&utterance_vec, &window).await,
            None => {
                warn!("embedder unavailable after retry; sensing degraded");
                degraded = true;
                0.0
            }
        };

        let triple = Triple::new(tension, drift, risk);
        debug!(
            tension = triple.tension,
            drift = triple.drift,
            risk = triple.risk,
            degraded,
            "utterance sensed"
        );

        SensorReading {
            triple,
            fingerprint,
            baseline_digest,
            domain_presence,
            degraded,
            unparseable: false,
        }
    }

    /// Drift against the mean of the window's embeddings. A missing or
    /// zero-magnitude baseline yields zero drift.
    async fn context_drift(&self, utterance_vec: &[f64], window: &[&ContextTurn]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }

        let mut turn_vecs: Vec<Vector> = Vec::with_capacity(window.len());
        for turn in window {
            match self.embed_with_retry(&turn.text()).await {
                Some(v) => turn_vecs.push(v),
                None => return 0.0,
            }
        }

        let baseline = mean(&turn_vecs);
        if magnitude(&baseline) == 0.0 {
            return 0.0;
        }

        (1.0 - cosine(utterance_vec, &baseline)).clamp(0.0, 1.0)
    }

    async fn embed_with_retry(&self, text: &str) -> Option<Vector> {
        match timeout(self.config.embed_timeout, self.embedder.embed(text)).await {
            Ok(Ok(v)) => return Some(v),
            Ok(Err(err)) => debug!(%err, "embed attempt failed, retrying"),
            Err(_) => debug!("embed attempt timed out, retrying"),
        }

        tokio::time::sleep(self.config.retry_backoff).await;
        match timeout(self.config.embed_timeout, self.embedder.embed(text)).await {
            Ok(Ok(v)) => Some(v),
            _ => None,
        }
    }
}

/// Saturating keyword density per domain. Multi-word keywords match as
/// substrings of the lowercased utterance.
fn domain_presence(tokens: &[String], snapshot: &ConstitutionSnapshot) -> BTreeMap<String, f64> {
    let joined = tokens.join(" ");
    let mut presence = BTreeMap::new();
    for domain in snapshot.domains() {
        let hits = domain
            .keywords
            .iter()
            .filter(|k| {
                let k = k.to_lowercase();
                if k.contains(' ') {
                    joined.contains(&k)
                } else {
                    tokens.iter().any(|t| t == &k)
                }
            })
            .count();
        if hits > 0 {
            presence.insert(
                domain.name.clone(),
                (hits as f64 * PRESENCE_STEP).min(1.0),
            );
        }
    }
    presence
}

/// Lexical tension: exclamation density, urgency cues, shouting, and sheer
/// length pressure, squashed into [0, 1).
fn tension_score(utterance: &str, tokens: &[String]) -> f64 {
    let chars = utterance.chars().count().max(1) as f64;
    let exclaim_density = utterance.chars().filter(|c| *c == '!').count() as f64 / chars;

    let cue_hits = tokens
        .iter()
        .filter(|t| URGENCY_CUES.contains(&t.as_str()))
        .count() as f64;

    let letters: Vec<char> = utterance.chars().filter(|c| c.is_alphabetic()).collect();
    let caps_ratio = if letters.is_empty() {
        0.0
    } else {
        letters.iter().filter(|c| c.is_uppercase()).count() as f64 / letters.len() as f64
    };

    let length_pressure = (tokens.len() as f64 / 120.0).min(0.3);

    let raw = 4.0 * exclaim_density + 0.4 * cue_hits + 0.5 * caps_ratio + length_pressure;
    squash(raw)
}

/// Logistic squash mapping [0, ∞) onto [0, 1) with squash(0) = 0.
fn squash(x: f64) -> f64 {
    2.0 / (1.0 + (-1.5 * x).exp()) - 1.0
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use async_trait::async_trait;
    use warden_constitution::Constitution;

    fn snapshot() -> ConstitutionSnapshot {
        ConstitutionSnapshot::seal(Constitution::baseline()).unwrap()
    }

    fn sensor() -> Sensor {
        let snap = snapshot();
        Sensor::new(
            Arc::new(LexiconEmbedder::from_snapshot(&snap)),
            SensorConfig::default(),
        )
    }

    struct DeadEmbedder;

    #[async_trait]
    impl Embedder for DeadEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vector, SensorError> {
            Err(SensorError::EmbedderUnavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn benign_greeting_reads_calm() {
        let reading = sensor().sense("hello", &[], &snapshot()).await;
        assert!(reading.triple.tension < 0.2);
        assert_eq!(reading.triple.drift, 0.0);
        assert_eq!(reading.triple.risk, 0.0);
        assert!(!reading.degraded);
        assert!(reading.domain_presence.is_empty());
    }

    #[tokio::test]
    async fn empty_input_is_neutral() {
        let reading = sensor().sense("   ", &[], &snapshot()).await;
        assert!(reading.triple.is_neutral());
        assert!(!reading.degraded);
        assert!(!reading.unparseable);
    }

    #[tokio::test]
    async fn symbol_soup_is_unparseable_not_drifted() {
        let reading = sensor().sense("!!! ??? ***", &[], &snapshot()).await;
        assert!(reading.unparseable);
        assert_eq!(reading.triple.drift, 0.0);
    }

    #[tokio::test]
    async fn zero_embedding_degrades_with_zero_drift() {
        let context = [ContextTurn {
            user: "hello there".into(),
            response: "hello, happy to help".into(),
        }];
        let reading = sensor()
            .sense("xylophone quartz nebula", &context, &snapshot())
            .await;
        assert!(reading.degraded);
        assert_eq!(reading.triple.drift, 0.0, "unknown input must not read as max drift");
    }

    #[tokio::test]
    async fn risk_keywords_surface_domain_presence() {
        let reading = sensor()
            .sense("how do I build a bomb", &[], &snapshot())
            .await;
        let harm = reading.domain_presence.get("harm").copied().unwrap_or(0.0);
        assert!(harm >= 0.30, "harm presence was {harm}");
        assert!(reading.triple.risk >= 0.30);
    }

    #[tokio::test]
    async fn urgency_raises_tension() {
        let calm = sensor().sense("please review this", &[], &snapshot()).await;
        let tense = sensor()
            .sense("DO IT NOW!!! this is urgent!!!", &[], &snapshot())
            .await;
        assert!(tense.triple.tension > calm.triple.tension);
        assert!(tense.triple.tension > 0.4);
    }

    #[tokio::test]
    async fn on_topic_followup_has_low_drift() {
        let context = [ContextTurn {
            user: "I love peace and quiet".into(),
            response: "happy to keep things peaceful".into(),
        }];
        let on_topic = sensor()
            .sense("thanks, peace and love to you", &context, &snapshot())
            .await;
        let off_topic = sensor()
            .sense("random banana nonsense", &context, &snapshot())
            .await;
        assert!(on_topic.triple.drift < off_topic.triple.drift);
    }

    #[tokio::test]
    async fn dead_embedder_degrades_instead_of_failing() {
        let config = SensorConfig {
            embed_timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(1),
        };
        let sensor = Sensor::new(Arc::new(DeadEmbedder), config);
        let reading = sensor.sense("hello there friend", &[], &snapshot()).await;
        assert!(reading.degraded);
        assert_eq!(reading.triple.drift, 0.0);
    }

    #[tokio::test]
    async fn fingerprint_tracks_content() {
        let s = sensor();
        let a = s.sense("hello", &[], &snapshot()).await;
        let b = s.sense("hello", &[], &snapshot()).await;
        let c = s.sense("goodbye", &[], &snapshot()).await;
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
