use thiserror::Error;
use warden_constitution::ConstitutionError;
use warden_ledger::LedgerError;
use warden_types::IslandId;

/// Caller-facing error taxonomy. Everything except `PolicyRejected` and
/// `ChainCorrupted` is retriable.
#[derive(Debug, Error)]
pub enum SpineError {
    #[error("island {0} is not active")]
    IslandNotActive(IslandId),

    #[error("island {0} breaker tripped; open a fresh island")]
    IslandBreakerTripped(IslandId),

    #[error("caller deadline exceeded")]
    CallerDeadlineExceeded,

    #[error("drafter unavailable: {0}")]
    DrafterUnavailable(String),

    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    #[error("chain corrupted on island {0}")]
    ChainCorrupted(IslandId),

    #[error("ledger failure: {0}")]
    Ledger(LedgerError),
}

impl SpineError {
    /// Whether the caller may retry the same request.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            SpineError::PolicyRejected(_) | SpineError::ChainCorrupted(_)
        )
    }
}

impl From<LedgerError> for SpineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::IslandNotFound(island) | LedgerError::IslandNotActive(island) => {
                SpineError::IslandNotActive(island)
            }
            LedgerError::ChainCorrupted { island, .. } => SpineError::ChainCorrupted(island),
            LedgerError::SequenceGap { island, .. } => SpineError::ChainCorrupted(island),
            other => SpineError::Ledger(other),
        }
    }
}

impl From<ConstitutionError> for SpineError {
    fn from(err: ConstitutionError) -> Self {
        SpineError::PolicyRejected(err.to_string())
    }
}
