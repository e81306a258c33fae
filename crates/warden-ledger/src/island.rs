//! TimeIsland: the bounded, sealable session container

use crate::chain::{content_hash, link_hash, GENESIS};
use crate::error::LedgerError;
use crate::record::{RecordPayload, StepRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use warden_types::{GateAction, IslandId, RecordId, Triple};

/// Island lifecycle states.
///
/// `Locked` is defined for wire compatibility but unreachable: no
/// transition in this module constructs it, and none may be added.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IslandState {
    Active,
    Suspended,
    Closed,
    Locked,
}

/// Metadata attached to an append.
#[derive(Clone, Debug)]
pub struct RecordMeta {
    pub triple: Triple,
    pub poav: Option<f64>,
    pub decision: Option<GateAction>,
    pub constitution_version: u64,
}

/// One session's record chain and lifecycle state.
///
/// The island owns its records outright; external references into the chain
/// are record ids and sequence numbers, never pointers.
#[derive(Clone, Debug)]
pub struct TimeIsland {
    island_id: IslandId,
    created_at: DateTime<Utc>,
    state: IslandState,
    /// Rolling digest over all content hashes.
    context_digest: String,
    /// Chain-link hash of the last record; `GENESIS` when empty.
    tip: String,
    next_sequence: u64,
    last_timestamp: DateTime<Utc>,
    /// Set when load-time verification failed; all appends are refused.
    poisoned: bool,
    records: Vec<StepRecord>,
}

impl TimeIsland {
    pub fn new(island_id: IslandId) -> Self {
        let now = Utc::now();
        Self {
            island_id,
            created_at: now,
            state: IslandState::Active,
            context_digest: hex::encode(Sha256::digest(b"")),
            tip: GENESIS.to_string(),
            next_sequence: 0,
            last_timestamp: now,
            poisoned: false,
            records: Vec::new(),
        }
    }

    /// Rebuild an island from a persisted record stream. The caller is
    /// responsible for verifying the stream first and poisoning the island
    /// if verification failed.
    pub fn from_records(island_id: IslandId, records: Vec<StepRecord>) -> Self {
        let mut island = Self::new(island_id);
        if let Some(first) = records.first() {
            island.created_at = first.timestamp;
        }
        for record in &records {
            island.fold_digest(&record.content_hash);
            island.tip = link_hash(record);
            island.next_sequence = record.sequence_num + 1;
            island.last_timestamp = record.timestamp;
            if record.kind == crate::record::RecordKind::IslandEnd {
                island.state = IslandState::Closed;
            }
        }
        island.records = records;
        island
    }

    pub fn island_id(&self) -> &IslandId {
        &self.island_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> IslandState {
        self.state
    }

    /// The island hash: chain-link hash of the last record.
    pub fn tip(&self) -> &str {
        &self.tip
    }

    pub fn context_digest(&self) -> &str {
        &self.context_digest
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the island unusable after failed load-time verification.
    pub fn poison(&mut self) {
        self.poisoned = true;
        self.state = IslandState::Closed;
    }

    /// The most recent record that is not a rollback, if any.
    pub fn last_non_rollback(&self) -> Option<&StepRecord> {
        self.records.iter().rev().find(|r| !r.is_rollback())
    }

    /// Build and attach the next record. Only legal while ACTIVE (the
    /// ledger's close path uses [`Self::append_unchecked`] for the seal).
    pub fn append(
        &mut self,
        payload: RecordPayload,
        meta: &RecordMeta,
    ) -> Result<StepRecord, LedgerError> {
        if self.poisoned {
            return Err(LedgerError::ChainCorrupted {
                island: self.island_id.clone(),
                detail: "island poisoned by failed verification".into(),
            });
        }
        if self.state != IslandState::Active {
            return Err(LedgerError::IslandNotActive(self.island_id.clone()));
        }
        self.append_unchecked(payload, meta)
    }

    /// Attach a record without the ACTIVE check. Used by the ledger to seal
    /// suspended islands; every other path goes through [`Self::append`].
    pub fn append_unchecked(
        &mut self,
        payload: RecordPayload,
        meta: &RecordMeta,
    ) -> Result<StepRecord, LedgerError> {
        // Weak per-island timestamp monotonicity, whatever the wall clock does.
        let now = Utc::now();
        let timestamp = if now < self.last_timestamp {
            self.last_timestamp
        } else {
            now
        };

        let content = content_hash(&payload)?;
        let record = StepRecord {
            record_id: RecordId::generate(),
            island_id: self.island_id.clone(),
            sequence_num: self.next_sequence,
            kind: payload.kind(),
            timestamp,
            triple: meta.triple,
            poav: meta.poav,
            decision: meta.decision,
            payload,
            content_hash: content,
            previous_hash: self.tip.clone(),
            constitution_version: meta.constitution_version,
        };

        self.fold_digest(&record.content_hash);
        self.tip = link_hash(&record);
        self.next_sequence += 1;
        self.last_timestamp = timestamp;
        self.records.push(record.clone());
        Ok(record)
    }

    /// ACTIVE → SUSPENDED.
    pub fn suspend(&mut self) -> Result<(), LedgerError> {
        if self.state != IslandState::Active {
            return Err(LedgerError::IslandNotActive(self.island_id.clone()));
        }
        self.state = IslandState::Suspended;
        Ok(())
    }

    /// SUSPENDED → ACTIVE. The only legal exit from suspension besides
    /// close.
    pub fn resume(&mut self) -> Result<(), LedgerError> {
        if self.state != IslandState::Suspended {
            return Err(LedgerError::IslandNotActive(self.island_id.clone()));
        }
        self.state = IslandState::Active;
        Ok(())
    }

    /// Transition to CLOSED. Terminal; callers seal via the ledger so the
    /// ISLAND_END record lands first.
    pub fn mark_closed(&mut self) {
        self.state = IslandState::Closed;
    }

    /// Snapshot of the chain position, taken before a speculative append.
    pub(crate) fn cursor(&self) -> ChainCursor {
        ChainCursor {
            tip: self.tip.clone(),
            context_digest: self.context_digest.clone(),
            next_sequence: self.next_sequence,
            last_timestamp: self.last_timestamp,
        }
    }

    /// Drop the record appended since `cursor` was taken. Used when the
    /// sink refused the write, so memory never gets ahead of the log.
    pub(crate) fn rewind(&mut self, cursor: ChainCursor) {
        self.records.truncate(cursor.next_sequence as usize);
        self.tip = cursor.tip;
        self.context_digest = cursor.context_digest;
        self.next_sequence = cursor.next_sequence;
        self.last_timestamp = cursor.last_timestamp;
    }

    fn fold_digest(&mut self, content_hash: &str) {
        let mut hasher = Sha256::new();
        hasher.update(self.context_digest.as_bytes());
        hasher.update(content_hash.as_bytes());
        self.context_digest = hex::encode(hasher.finalize());
    }
}

/// Saved chain position for [`TimeIsland::rewind`].
#[derive(Clone, Debug)]
pub(crate) struct ChainCursor {
    tip: String,
    context_digest: String,
    next_sequence: u64,
    last_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RecordMeta {
        RecordMeta {
            triple: Triple::neutral(),
            poav: None,
            decision: None,
            constitution_version: 1,
        }
    }

    fn input_payload(text: &str) -> RecordPayload {
        RecordPayload::UserInput {
            text: text.into(),
            fingerprint: "aa".into(),
            baseline_digest: "bb".into(),
            degraded: false,
            drift_alert: false,
        }
    }

    #[test]
    fn appends_link_and_sequence() {
        let mut island = TimeIsland::new(IslandId::generate());
        let first = island.append(input_payload("one"), &meta()).unwrap();
        let second = island.append(input_payload("two"), &meta()).unwrap();

        assert_eq!(first.sequence_num, 0);
        assert_eq!(first.previous_hash, GENESIS);
        assert_eq!(second.sequence_num, 1);
        assert_eq!(second.previous_hash, link_hash(&first));
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn tip_changes_on_every_append_and_is_stable_between() {
        let mut island = TimeIsland::new(IslandId::generate());
        assert_eq!(island.tip(), GENESIS);

        island.append(input_payload("same text"), &meta()).unwrap();
        let tip_one = island.tip().to_string();
        assert_eq!(island.tip(), tip_one);

        // Identical payload still moves the tip.
        island.append(input_payload("same text"), &meta()).unwrap();
        assert_ne!(island.tip(), tip_one);
    }

    #[test]
    fn suspended_island_refuses_appends() {
        let mut island = TimeIsland::new(IslandId::generate());
        island.suspend().unwrap();
        assert!(matches!(
            island.append(input_payload("x"), &meta()),
            Err(LedgerError::IslandNotActive(_))
        ));

        island.resume().unwrap();
        island.append(input_payload("x"), &meta()).unwrap();
    }

    #[test]
    fn resume_requires_suspension() {
        let mut island = TimeIsland::new(IslandId::generate());
        assert!(island.resume().is_err());
    }

    #[test]
    fn locked_state_is_never_produced() {
        let mut island = TimeIsland::new(IslandId::generate());
        island.append(input_payload("a"), &meta()).unwrap();
        island.suspend().unwrap();
        island.resume().unwrap();
        island.mark_closed();
        assert_ne!(island.state(), IslandState::Locked);
    }

    #[test]
    fn poisoned_island_refuses_appends_as_corrupted() {
        let mut island = TimeIsland::new(IslandId::generate());
        island.poison();
        assert!(matches!(
            island.append(input_payload("x"), &meta()),
            Err(LedgerError::ChainCorrupted { .. })
        ));
    }

    #[test]
    fn rebuild_from_records_restores_tip_and_sequence() {
        let mut island = TimeIsland::new(IslandId::generate());
        island.append(input_payload("a"), &meta()).unwrap();
        island.append(input_payload("b"), &meta()).unwrap();
        let tip = island.tip().to_string();

        let rebuilt =
            TimeIsland::from_records(island.island_id().clone(), island.records().to_vec());
        assert_eq!(rebuilt.tip(), tip);
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.state(), IslandState::Active);
    }

    #[test]
    fn last_non_rollback_skips_rollbacks() {
        let mut island = TimeIsland::new(IslandId::generate());
        let target = island.append(input_payload("a"), &meta()).unwrap();
        island
            .append(
                RecordPayload::Rollback {
                    voided_record: target.record_id.clone(),
                    voided_sequence: target.sequence_num,
                },
                &meta(),
            )
            .unwrap();
        let found = island.last_non_rollback().unwrap();
        assert_eq!(found.record_id, target.record_id);
    }

    #[test]
    fn context_digest_rolls_forward() {
        let mut island = TimeIsland::new(IslandId::generate());
        let empty = island.context_digest().to_string();
        island.append(input_payload("a"), &meta()).unwrap();
        let one = island.context_digest().to_string();
        assert_ne!(empty, one);
        island.append(input_payload("b"), &meta()).unwrap();
        assert_ne!(island.context_digest(), one);
    }
}
