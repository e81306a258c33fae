//! # warden-constitution
//!
//! The constitution is the versioned policy bundle Warden enforces:
//! decision thresholds, POAV weights, the P0..P4 priority table, per-domain
//! risk keyword sets, the rewrite budget, and the rollback limit.
//!
//! The store hands out immutable snapshots. Readers capture one snapshot at
//! the start of an utterance and keep it for every downstream call, so a
//! reload can never split a single decision. Reloads are copy-on-write: a
//! new snapshot is validated in full and the pointer is swapped atomically;
//! a rejected bundle leaves the previous snapshot active.

#![deny(unsafe_code)]

pub mod error;
pub mod model;
pub mod store;

pub use error::ConstitutionError;
pub use model::{
    Constitution, ConstitutionSnapshot, PolicyRule, Priority, RiskDomain, Thresholds,
};
pub use store::ConstitutionStore;
