//! Embedding seam and the bundled lexicon embedder

use crate::error::SensorError;
use async_trait::async_trait;
use std::collections::HashMap;
use warden_constitution::ConstitutionSnapshot;

/// Number of axes in the anchor space:
/// risk, tension, drift, positive, negative.
pub const AXES: usize = 5;

pub type Vector = Vec<f64>;

/// An embedding provider. Implementations may call out to a service; the
/// sensor bounds every call with a timeout and retries once.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vector, SensorError>;
}

/// Cosine similarity. Zero-magnitude vectors yield 0 rather than NaN.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Element-wise mean of a set of equal-length vectors.
pub fn mean(vectors: &[Vector]) -> Vector {
    if vectors.is_empty() {
        return Vec::new();
    }
    let len = vectors[0].len();
    let mut out = vec![0.0; len];
    for v in vectors {
        for (acc, x) in out.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f64;
    for acc in &mut out {
        *acc /= n;
    }
    out
}

pub fn magnitude(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Deterministic embedder over a fixed anchor lexicon.
///
/// Each anchor token carries a five-axis vector; an utterance embeds as the
/// sum of its anchor vectors. Tokens outside the lexicon contribute nothing,
/// so fully unknown input embeds to the zero vector and the sensor reports a
/// degraded reading with zero drift.
pub struct LexiconEmbedder {
    anchors: HashMap<String, [f64; AXES]>,
}

impl LexiconEmbedder {
    /// The built-in anchor table alone.
    pub fn new() -> Self {
        Self {
            anchors: builtin_anchors(),
        }
    }

    /// Built-in anchors merged with the snapshot's risk keyword domains.
    /// Domain keywords land on the risk axis scaled by the domain weight.
    pub fn from_snapshot(snapshot: &ConstitutionSnapshot) -> Self {
        let mut anchors = builtin_anchors();
        for domain in snapshot.domains() {
            for keyword in &domain.keywords {
                let entry = anchors
                    .entry(keyword.to_lowercase())
                    .or_insert([0.0; AXES]);
                entry[0] = entry[0].max(domain.weight);
                entry[4] = entry[4].max(0.2 * domain.weight);
            }
        }
        Self { anchors }
    }

    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl Default for LexiconEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for LexiconEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector, SensorError> {
        let mut out = vec![0.0; AXES];
        for token in Self::tokenize(text) {
            if let Some(anchor) = self.anchors.get(&token) {
                for (acc, x) in out.iter_mut().zip(anchor) {
                    *acc += x;
                }
            }
        }
        Ok(out)
    }
}

/// Anchor axes: [risk, tension, drift, positive, negative].
fn builtin_anchors() -> HashMap<String, [f64; AXES]> {
    let table: &[(&str, [f64; AXES])] = &[
        // Hostility and pressure
        ("hate", [0.3, 1.0, 0.0, 0.0, 0.3]),
        ("furious", [0.1, 1.0, 0.0, 0.0, 0.2]),
        ("angry", [0.1, 0.9, 0.0, 0.0, 0.2]),
        ("stupid", [0.1, 0.8, 0.0, 0.0, 0.2]),
        ("useless", [0.1, 0.7, 0.0, 0.0, 0.2]),
        ("urgent", [0.0, 0.7, 0.0, 0.0, 0.0]),
        ("emergency", [0.1, 0.8, 0.0, 0.0, 0.0]),
        ("now", [0.0, 0.4, 0.0, 0.0, 0.0]),
        ("immediately", [0.0, 0.6, 0.0, 0.0, 0.0]),
        // Topic noise
        ("random", [0.0, 0.0, 0.9, 0.0, 0.0]),
        ("nonsense", [0.0, 0.0, 0.8, 0.0, 0.1]),
        ("gibberish", [0.0, 0.0, 0.8, 0.0, 0.1]),
        ("banana", [0.0, 0.0, 0.6, 0.1, 0.0]),
        // Warmth
        ("hello", [0.0, -0.1, 0.0, 0.3, 0.0]),
        ("thanks", [0.0, -0.3, 0.0, 0.8, 0.0]),
        ("love", [0.0, -0.4, 0.0, 1.0, 0.0]),
        ("happy", [0.0, -0.3, 0.0, 0.9, 0.0]),
        ("great", [0.0, -0.2, 0.0, 0.7, 0.0]),
        ("peace", [0.0, -0.3, 0.0, 0.8, 0.0]),
        ("help", [0.0, 0.1, 0.0, 0.4, 0.0]),
        // Technical context softeners ("kill the process")
        ("process", [-0.5, -0.2, 0.0, 0.0, 0.0]),
        ("task", [-0.3, -0.1, 0.0, 0.0, 0.0]),
        ("debug", [-0.4, -0.1, 0.0, 0.0, 0.0]),
        ("server", [-0.3, 0.0, 0.0, 0.0, 0.0]),
    ];

    table
        .iter()
        .map(|(word, axes)| (word.to_string(), *axes))
        .collect()
}
