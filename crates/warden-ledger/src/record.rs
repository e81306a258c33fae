//! Step records and their kind-specific payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_types::{GateAction, GateDecision, IslandId, RecordId, Triple};

/// The nine record kinds. Persisted in SCREAMING_SNAKE_CASE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    IslandStart,
    IslandEnd,
    UserInput,
    Draft,
    Verify,
    GateDecision,
    Rollback,
    Fallback,
    Response,
}

/// Kind-specific payload. The tag mirrors [`RecordKind`]; canonical
/// serialization of this value is the content-hash input, so every field
/// here is part of the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordPayload {
    IslandStart {
        reason: String,
    },
    IslandEnd {
        reason: String,
        /// Tip of the chain just before this seal record.
        pre_seal_tip: String,
    },
    UserInput {
        text: String,
        fingerprint: String,
        baseline_digest: String,
        degraded: bool,
        drift_alert: bool,
    },
    Draft {
        text: String,
        attempt: u32,
        prompt: String,
        temperature: f64,
        grounding: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        hallucination_self: Option<f64>,
    },
    Verify {
        hallucination: f64,
        consistent: bool,
        verification_ratio: f64,
        details: Vec<String>,
    },
    GateDecision {
        decision: GateDecision,
        /// 1 for the pre-draft gate, 2 for the post-verification gate.
        stage: u8,
    },
    Rollback {
        /// The record this rollback voids. Decisions referencing it must be
        /// treated as void; the record itself is never touched.
        voided_record: RecordId,
        voided_sequence: u64,
    },
    Fallback {
        text: String,
        reason: String,
    },
    Response {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<RecordId>,
        cancelled: bool,
        degraded_draft: bool,
    },
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::IslandStart { .. } => RecordKind::IslandStart,
            RecordPayload::IslandEnd { .. } => RecordKind::IslandEnd,
            RecordPayload::UserInput { .. } => RecordKind::UserInput,
            RecordPayload::Draft { .. } => RecordKind::Draft,
            RecordPayload::Verify { .. } => RecordKind::Verify,
            RecordPayload::GateDecision { .. } => RecordKind::GateDecision,
            RecordPayload::Rollback { .. } => RecordKind::Rollback,
            RecordPayload::Fallback { .. } => RecordKind::Fallback,
            RecordPayload::Response { .. } => RecordKind::Response,
        }
    }
}

/// One immutable ledger record. Field set and names match the persisted
/// contract exactly; any deviation invalidates the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub record_id: RecordId,
    pub island_id: IslandId,
    pub sequence_num: u64,
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    pub triple: Triple,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poav: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<GateAction>,
    pub payload: RecordPayload,
    pub content_hash: String,
    pub previous_hash: String,
    pub constitution_version: u64,
}

impl StepRecord {
    pub fn is_rollback(&self) -> bool {
        self.kind == RecordKind::Rollback
    }
}
