use thiserror::Error;
use warden_types::IslandId;

/// Errors from the ledger. Integrity and state errors are surfaced upward
/// and never silently continued past.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("island {0} not found")]
    IslandNotFound(IslandId),

    #[error("island {0} is not active")]
    IslandNotActive(IslandId),

    #[error("chain corrupted on island {island}: {detail}")]
    ChainCorrupted { island: IslandId, detail: String },

    #[error("sequence gap on island {island}: expected {expected}, found {found}")]
    SequenceGap {
        island: IslandId,
        expected: u64,
        found: u64,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger io failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_island() {
        let id = IslandId::generate();
        let err = LedgerError::ChainCorrupted {
            island: id.clone(),
            detail: "bad link".into(),
        };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
