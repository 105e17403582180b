use std::time::Duration;

use thiserror::Error;

/// Failure modes of the detection engine.
///
/// Only `ModelUnavailable` is surfaced to callers as fatal; inference errors
/// and timeouts are logged per tick and the loop carries on.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detection model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("detection loop already running")]
    AlreadyRunning,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}
