//! Persistence sinks for the record stream

use crate::chain::canonical_json;
use crate::error::LedgerError;
use crate::record::StepRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use warden_types::IslandId;

/// Where committed records go. Implementations must make a record durable
/// before `append` returns; `sync` is the hard barrier used at island
/// boundaries and before BLOCK records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &StepRecord) -> Result<(), LedgerError>;

    /// Flush everything written so far to stable storage.
    async fn sync(&self) -> Result<(), LedgerError>;

    /// All records for one island, in write order.
    async fn read_island(&self, island: &IslandId) -> Result<Vec<StepRecord>, LedgerError>;

    /// Every record across islands, in write order.
    async fn read_all(&self) -> Result<Vec<StepRecord>, LedgerError>;
}

/// In-memory sink for tests and ephemeral runs.
pub struct MemorySink {
    records: RwLock<Vec<StepRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, record: &StepRecord) -> Result<(), LedgerError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn sync(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn read_island(&self, island: &IslandId) -> Result<Vec<StepRecord>, LedgerError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| &r.island_id == island)
            .cloned()
            .collect())
    }

    async fn read_all(&self) -> Result<Vec<StepRecord>, LedgerError> {
        Ok(self.records.read().clone())
    }
}

/// Append-only JSONL file sink. One canonical JSON record per line.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Open (or create) the write log at `path`.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_lines(&self) -> Result<Vec<StepRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append(&self, record: &StepRecord) -> Result<(), LedgerError> {
        let line = canonical_json(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn sync(&self) -> Result<(), LedgerError> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().append(true).open(&self.path).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read_island(&self, island: &IslandId) -> Result<Vec<StepRecord>, LedgerError> {
        Ok(self
            .read_lines()
            .await?
            .into_iter()
            .filter(|r| &r.island_id == island)
            .collect())
    }

    async fn read_all(&self) -> Result<Vec<StepRecord>, LedgerError> {
        self.read_lines().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::island::{RecordMeta, TimeIsland};
    use crate::record::RecordPayload;
    use warden_types::Triple;

    fn meta() -> RecordMeta {
        RecordMeta {
            triple: Triple::neutral(),
            poav: None,
            decision: None,
            constitution_version: 1,
        }
    }

    fn some_records(n: usize) -> Vec<StepRecord> {
        let mut island = TimeIsland::new(IslandId::generate());
        (0..n)
            .map(|i| {
                island
                    .append(
                        RecordPayload::UserInput {
                            text: format!("turn {i}"),
                            fingerprint: "aa".into(),
                            baseline_digest: "bb".into(),
                            degraded: false,
                            drift_alert: false,
                        },
                        &meta(),
                    )
                    .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn memory_sink_stores_in_order() {
        let sink = MemorySink::new();
        let records = some_records(3);
        for r in &records {
            sink.append(r).await.unwrap();
        }
        let back = sink.read_island(&records[0].island_id).await.unwrap();
        assert_eq!(back, records);
    }

    #[tokio::test]
    async fn file_sink_round_trips_canonical_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("ledger.jsonl")).await.unwrap();

        let records = some_records(3);
        for r in &records {
            sink.append(r).await.unwrap();
        }
        sink.sync().await.unwrap();

        let back = sink.read_all().await.unwrap();
        assert_eq!(back, records);
        // Re-parsed records hash identically.
        for (orig, reread) in records.iter().zip(&back) {
            assert_eq!(
                crate::chain::content_hash(&reread.payload).unwrap(),
                orig.content_hash
            );
        }
    }

    #[tokio::test]
    async fn file_sink_filters_by_island() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("ledger.jsonl")).await.unwrap();

        let a = some_records(2);
        let b = some_records(2);
        for r in a.iter().chain(&b) {
            sink.append(r).await.unwrap();
        }

        let only_a = sink.read_island(&a[0].island_id).await.unwrap();
        assert_eq!(only_a, a);
    }

    #[tokio::test]
    async fn sync_on_missing_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("never-written.jsonl"))
            .await
            .unwrap();
        sink.sync().await.unwrap();
    }
}
