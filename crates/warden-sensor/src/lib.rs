//! # warden-sensor
//!
//! Converts an utterance plus the island's recent history into the (T, S, R)
//! state triple, a content fingerprint, and a context baseline digest.
//!
//! Sensing is deterministic given the same inputs and constitution snapshot.
//! The drift axis is embedding-based; the bundled [`LexiconEmbedder`] maps
//! tokens onto a fixed anchor space so the pipeline runs without an external
//! embedding service, and any real embedder can plug in behind the
//! [`Embedder`] trait.
//!
//! Failure posture: input the sensor cannot observe yields the *neutral*
//! triple: unknown input is never treated as maximum drift. Embedder
//! failures degrade the reading (and the gate tightens) instead of erroring
//! the utterance.

#![deny(unsafe_code)]

pub mod drift;
pub mod embed;
pub mod error;
pub mod sensor;

pub use drift::{DriftAlert, DriftMonitor};
pub use embed::{cosine, mean, Embedder, LexiconEmbedder, Vector, AXES};
pub use error::SensorError;
pub use sensor::{ContextTurn, Sensor, SensorConfig, SensorReading};
