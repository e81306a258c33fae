//! # warden-drafter
//!
//! The adapter that asks the external model for a candidate response,
//! modulated by the utterance's state triple: higher tension means more
//! conservative decoding and a calmer register, higher drift means more
//! grounding emphasis.
//!
//! The adapter makes no determinism claim for real upstreams; the ledger
//! records the exact prompt and parameters instead. The bundled
//! [`TemplateDrafter`] *is* deterministic so offline runs and the scenario
//! suite are stable.

#![deny(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_types::Triple;

/// Baseline decoding temperature before modulation.
const BASE_TEMPERATURE: f64 = 0.7;

/// Errors from the upstream drafter.
#[derive(Debug, Error)]
pub enum DrafterError {
    #[error("upstream draft request timed out")]
    Timeout,

    #[error("upstream quota exhausted")]
    QuotaExhausted,

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Voice the draft should take, chosen from the triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneRegister {
    /// High tension: slow down, soften.
    Calm,
    /// Elevated risk: hedge, cite, avoid prescriptions.
    Precise,
    /// Nothing notable.
    Neutral,
}

/// Decoding parameters derived from the state triple.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModulationParams {
    pub temperature: f64,
    /// In [0, 1]: how hard the prompt pushes staying anchored to context.
    pub grounding: f64,
    pub tone: ToneRegister,
}

impl ModulationParams {
    /// Derive parameters from the triple: tension cools decoding, drift
    /// raises grounding emphasis, risk selects the precise register.
    pub fn from_triple(triple: &Triple) -> Self {
        let temperature = (BASE_TEMPERATURE * (1.0 - 0.6 * triple.tension)).max(0.1);
        let grounding = (0.3 + 0.7 * triple.drift).min(1.0);
        let tone = if triple.tension >= 0.6 {
            ToneRegister::Calm
        } else if triple.risk >= 0.4 {
            ToneRegister::Precise
        } else {
            ToneRegister::Neutral
        };
        Self {
            temperature,
            grounding,
            tone,
        }
    }
}

/// One draft request. The full request is recorded on the ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftRequest {
    pub prompt: String,
    /// Recent island turns, oldest first.
    pub context: Vec<String>,
    pub params: ModulationParams,
    /// 0 for the first attempt, incremented per rewrite.
    pub attempt: u32,
    /// Rewrite guidance from the gate, when this is a rewrite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

/// A candidate from the upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftResponse {
    pub text: String,
    /// Self-reported hallucination estimate, when the upstream exposes one.
    pub hallucination_self: Option<f64>,
}

/// The upstream seam. Real deployments wrap an LLM endpoint; tests and
/// offline runs use [`TemplateDrafter`].
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, request: &DraftRequest) -> Result<DraftResponse, DrafterError>;
}

/// Deterministic template drafter.
///
/// Echoes the substance of the prompt back in the selected register so the
/// verifier's consistency check sees real overlap, and folds rewrite
/// guidance in the way a cooperating upstream would.
pub struct TemplateDrafter;

#[async_trait]
impl Drafter for TemplateDrafter {
    async fn draft(&self, request: &DraftRequest) -> Result<DraftResponse, DrafterError> {
        let subject = request.prompt.trim();
        let body = match request.params.tone {
            ToneRegister::Calm => format!(
                "Let's take this one step at a time. On \"{subject}\": here is a careful answer."
            ),
            ToneRegister::Precise => format!(
                "Sticking to what can be grounded, regarding \"{subject}\": here is what applies."
            ),
            ToneRegister::Neutral => format!("Regarding \"{subject}\": here is what I can offer."),
        };

        let text = match (&request.guidance, request.attempt) {
            (Some(guidance), _) => format!("{body} (revised: {guidance})"),
            (None, 0) => body,
            (None, n) => format!("{body} (attempt {n})"),
        };

        Ok(DraftResponse {
            text,
            hallucination_self: Some(0.05),
        })
    }
}

/// A drafter that always fails; used to exercise fallback paths.
pub struct UnavailableDrafter;

#[async_trait]
impl Drafter for UnavailableDrafter {
    async fn draft(&self, _request: &DraftRequest) -> Result<DraftResponse, DrafterError> {
        Err(DrafterError::Upstream("drafter offline".into()))
    }
}
