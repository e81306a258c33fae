//! # warden-spine
//!
//! The orchestrator. Drives one utterance from arrival to final response:
//!
//! ```text
//! RECEIVED → SENSED → GATED#1 ─ BLOCK ──→ FALLBACK → RECORDED → END
//!                        │
//!                 PASS / REWRITE
//!                        ▼
//!                    DRAFTING → VERIFIED → GATED#2 ─ PASS ──→ RECORDED → END
//!                        ▲                    │
//!                        └── REWRITE (budget)─┤
//!                                             └ BLOCK → ROLLBACK → RECORDED → END
//! ```
//!
//! The spine enforces the rewrite budget, the rollback reflex, the
//! per-island circuit breaker, drafter backpressure, and caller deadlines.
//! One constitution snapshot is captured per utterance and used for every
//! downstream call, so a reload can never split a decision.

#![deny(unsafe_code)]

pub mod breaker;
pub mod error;
pub mod spine;

pub use breaker::RollbackBreaker;
pub use error::SpineError;
pub use spine::{Spine, SpineBuilder, SpineConfig, SubmitOutcome};
