//! The StepLedger: exclusive-writer surface over islands and sink

use crate::chain::verify_records;
use crate::error::LedgerError;
use crate::island::{IslandState, RecordMeta, TimeIsland};
use crate::record::{RecordKind, RecordPayload, StepRecord};
use crate::sink::{MemorySink, RecordSink};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use warden_types::{GateAction, IslandId};

/// Risk level above which a record counts as critical for audit queries.
const CRITICAL_RISK: f64 = 0.7;

/// The append-only record store. One hash chain per island, one exclusive
/// writer per island, no cross-island locks.
pub struct StepLedger {
    islands: DashMap<IslandId, Arc<Mutex<TimeIsland>>>,
    sink: Arc<dyn RecordSink>,
}

impl StepLedger {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self {
            islands: DashMap::new(),
            sink,
        }
    }

    /// Ledger over an in-memory sink, for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySink::new()))
    }

    /// Rebuild a ledger from a persisted sink. Every island's chain is
    /// verified from scratch; islands that fail verification are sealed and
    /// poisoned so appends surface `ChainCorrupted` instead of extending a
    /// bad chain.
    pub async fn open(sink: Arc<dyn RecordSink>) -> Result<Self, LedgerError> {
        let ledger = Self::new(Arc::clone(&sink));

        let mut grouped: BTreeMap<String, (IslandId, Vec<StepRecord>)> = BTreeMap::new();
        for record in sink.read_all().await? {
            grouped
                .entry(record.island_id.to_string())
                .or_insert_with(|| (record.island_id.clone(), Vec::new()))
                .1
                .push(record);
        }

        for (_, (island_id, records)) in grouped {
            let verification = verify_records(&records)?;
            let mut island = TimeIsland::from_records(island_id.clone(), records);
            if !verification.valid {
                warn!(
                    island = %island_id,
                    detail = verification.detail.as_deref().unwrap_or("unknown"),
                    "chain verification failed at load; island poisoned"
                );
                island.poison();
            }
            ledger
                .islands
                .insert(island_id, Arc::new(Mutex::new(island)));
        }

        Ok(ledger)
    }

    /// Create a new ACTIVE island and write its ISLAND_START record.
    pub async fn create_island(
        &self,
        constitution_version: u64,
    ) -> Result<IslandId, LedgerError> {
        let island_id = IslandId::generate();
        let mut island = TimeIsland::new(island_id.clone());
        let meta = RecordMeta {
            triple: warden_types::Triple::neutral(),
            poav: None,
            decision: None,
            constitution_version,
        };
        let record = island.append(
            RecordPayload::IslandStart {
                reason: "open".into(),
            },
            &meta,
        )?;
        self.sink.append(&record).await?;
        // Island boundary: make the start record durable immediately.
        self.sink.sync().await?;

        self.islands
            .insert(island_id.clone(), Arc::new(Mutex::new(island)));
        info!(island = %island_id, "island opened");
        Ok(island_id)
    }

    /// Append one record to an ACTIVE island. The record is committed to
    /// the sink before this returns; BLOCK decisions force a sync barrier.
    pub async fn append(
        &self,
        island_id: &IslandId,
        payload: RecordPayload,
        meta: RecordMeta,
    ) -> Result<StepRecord, LedgerError> {
        let island = self.island_handle(island_id)?;
        let mut guard = island.lock().await;

        let cursor = guard.cursor();
        let record = guard.append(payload, &meta)?;
        if let Err(err) = self.sink.append(&record).await {
            // Keep memory and sink agreeing about the chain.
            guard.rewind(cursor);
            return Err(err);
        }
        if record.kind == RecordKind::IslandEnd || meta.decision == Some(GateAction::Block) {
            self.sink.sync().await?;
        }
        Ok(record)
    }

    /// ACTIVE → SUSPENDED.
    pub async fn suspend(&self, island_id: &IslandId) -> Result<(), LedgerError> {
        let island = self.island_handle(island_id)?;
        let result = island.lock().await.suspend();
        result
    }

    /// SUSPENDED → ACTIVE.
    pub async fn resume(&self, island_id: &IslandId) -> Result<(), LedgerError> {
        let island = self.island_handle(island_id)?;
        let result = island.lock().await.resume();
        result
    }

    /// Seal an island: append ISLAND_END carrying the pre-seal tip, sync,
    /// and transition to CLOSED. Closing a CLOSED island is a no-op.
    pub async fn close(
        &self,
        island_id: &IslandId,
        reason: &str,
        constitution_version: u64,
    ) -> Result<Option<StepRecord>, LedgerError> {
        let island = self.island_handle(island_id)?;
        let mut guard = island.lock().await;

        if guard.state() == IslandState::Closed {
            return Ok(None);
        }

        let meta = RecordMeta {
            triple: warden_types::Triple::neutral(),
            poav: None,
            decision: None,
            constitution_version,
        };
        let payload = RecordPayload::IslandEnd {
            reason: reason.to_string(),
            pre_seal_tip: guard.tip().to_string(),
        };

        let cursor = guard.cursor();
        // Close is legal from SUSPENDED too, so the seal bypasses the
        // ACTIVE check.
        let record = guard.append_unchecked(payload, &meta)?;
        if let Err(err) = self.sink.append(&record).await {
            guard.rewind(cursor);
            return Err(err);
        }
        self.sink.sync().await?;
        guard.mark_closed();
        info!(island = %island_id, reason, "island sealed");
        Ok(Some(record))
    }

    /// Recompute every hash for one island from the authoritative sink.
    pub async fn verify_chain(&self, island_id: &IslandId) -> Result<bool, LedgerError> {
        if !self.islands.contains_key(island_id) {
            return Err(LedgerError::IslandNotFound(island_id.clone()));
        }
        let records = self.sink.read_island(island_id).await?;
        Ok(verify_records(&records)?.valid)
    }

    /// Current island hash.
    pub async fn tip(&self, island_id: &IslandId) -> Result<String, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.tip().to_string())
    }

    pub async fn state(&self, island_id: &IslandId) -> Result<IslandState, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.state())
    }

    pub async fn created_at(
        &self,
        island_id: &IslandId,
    ) -> Result<chrono::DateTime<chrono::Utc>, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.created_at())
    }

    /// Whether load-time verification condemned this island.
    pub async fn is_poisoned(&self, island_id: &IslandId) -> Result<bool, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.is_poisoned())
    }

    /// Copy of an island's records, up to the current tip.
    pub async fn records(&self, island_id: &IslandId) -> Result<Vec<StepRecord>, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.records().to_vec())
    }

    /// The most recent non-rollback record, the rollback reflex's target.
    pub async fn last_non_rollback(
        &self,
        island_id: &IslandId,
    ) -> Result<Option<StepRecord>, LedgerError> {
        let island = self.island_handle(island_id)?;
        let guard = island.lock().await;
        Ok(guard.last_non_rollback().cloned())
    }

    /// High-risk, blocked, or rolled-back records for one island.
    pub async fn critical_records(
        &self,
        island_id: &IslandId,
    ) -> Result<Vec<StepRecord>, LedgerError> {
        let records = self.records(island_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| {
                r.triple.risk > CRITICAL_RISK
                    || r.decision == Some(GateAction::Block)
                    || r.kind == RecordKind::Rollback
            })
            .collect())
    }

    /// Aggregate counts across all islands.
    pub async fn statistics(&self) -> LedgerStatistics {
        let mut stats = LedgerStatistics::default();
        let handles: Vec<Arc<Mutex<TimeIsland>>> = self
            .islands
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        stats.total_islands = handles.len();

        for handle in handles {
            let guard = handle.lock().await;
            for record in guard.records() {
                stats.total_records += 1;
                *stats
                    .by_kind
                    .entry(format!("{:?}", record.kind))
                    .or_insert(0) += 1;
                match record.decision {
                    Some(GateAction::Pass) => stats.pass_count += 1,
                    Some(GateAction::Rewrite) => stats.rewrite_count += 1,
                    Some(GateAction::Block) => stats.block_count += 1,
                    None => {}
                }
                if record.kind == RecordKind::Rollback {
                    stats.rollback_count += 1;
                }
            }
        }
        stats
    }

    fn island_handle(&self, island_id: &IslandId) -> Result<Arc<Mutex<TimeIsland>>, LedgerError> {
        self.islands
            .get(island_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LedgerError::IslandNotFound(island_id.clone()))
    }
}

/// Aggregate ledger counts.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LedgerStatistics {
    pub total_islands: usize,
    pub total_records: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub pass_count: usize,
    pub rewrite_count: usize,
    pub block_count: usize,
    pub rollback_count: usize,
}
