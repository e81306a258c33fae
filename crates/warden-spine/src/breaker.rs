//! Per-island rollback circuit breaker

use dashmap::{DashMap, DashSet};
use tracing::warn;
use warden_types::IslandId;

/// Tracks consecutive rollbacks per island and remembers tripped islands.
///
/// A rollback increments the island's count; a PASS resets it. When the
/// count reaches the constitution's rollback limit the spine seals the
/// island and marks it tripped here; further submissions are refused until
/// the caller opens a fresh island.
pub struct RollbackBreaker {
    counts: DashMap<IslandId, u32>,
    tripped: DashSet<IslandId>,
}

impl RollbackBreaker {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
            tripped: DashSet::new(),
        }
    }

    /// Record one rollback, returning the new consecutive count.
    pub fn record_rollback(&self, island: &IslandId) -> u32 {
        let mut entry = self.counts.entry(island.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// A successful pass breaks the streak.
    pub fn reset(&self, island: &IslandId) {
        self.counts.remove(island);
    }

    pub fn consecutive(&self, island: &IslandId) -> u32 {
        self.counts.get(island).map(|c| *c).unwrap_or(0)
    }

    /// Mark the island tripped. Terminal until the island is abandoned.
    pub fn trip(&self, island: &IslandId) {
        warn!(island = %island, "rollback breaker tripped");
        self.tripped.insert(island.clone());
    }

    pub fn is_tripped(&self, island: &IslandId) -> bool {
        self.tripped.contains(island)
    }
}

impl Default for RollbackBreaker {
    fn default() -> Self {
        Self::new()
    }
}
