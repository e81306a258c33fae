use thiserror::Error;

/// Errors from embedding providers.
///
/// These never surface to the caller as utterance failures; the sensor
/// degrades the reading instead.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("embedding request timed out")]
    Timeout,
}
