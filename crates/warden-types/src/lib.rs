//! # warden-types
//!
//! Shared primitives for the Warden governance middleware: session and
//! record identifiers, the per-utterance state triple, POAV scoring, and
//! the structured gate decision carried through the pipeline and onto the
//! audit ledger.

#![deny(unsafe_code)]

pub mod decision;
pub mod id;
pub mod poav;
pub mod triple;

pub use decision::{GateAction, GateDecision, ScoreSnapshot};
pub use id::{IslandId, RecordId};
pub use poav::{PoavInputs, PoavWeights};
pub use triple::Triple;
