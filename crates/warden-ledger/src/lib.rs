//! # warden-ledger
//!
//! The StepLedger: an append-only, content-addressed, hash-chained record
//! store with one chain per TimeIsland. Integrity (tamper evidence) is
//! the guarantee; confidentiality is not.
//!
//! Every append is committed to the sink before the call returns. The file
//! sink persists newline-delimited canonical JSON and syncs to disk at
//! island boundaries and before BLOCK records. `verify_chain` re-reads the
//! authoritative sink and recomputes every hash from scratch, so the same
//! record stream always verifies the same way regardless of wall clock or
//! the interleaving during the original writes.
//!
//! Islands are serialized behind per-island locks; appends on different
//! islands run in parallel with no cross-island ordering defined.

#![deny(unsafe_code)]

pub mod chain;
pub mod error;
pub mod island;
pub mod ledger;
pub mod record;
pub mod sink;

pub use chain::{verify_records, ChainVerification, GENESIS};
pub use error::LedgerError;
pub use island::{IslandState, RecordMeta, TimeIsland};
pub use ledger::{LedgerStatistics, StepLedger};
pub use record::{RecordKind, RecordPayload, StepRecord};
pub use sink::{FileSink, MemorySink, RecordSink};
