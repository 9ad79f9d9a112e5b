/// Canonical error type for the normalization engine.
///
/// Transport failures reach the engine as raw messages on the line stream;
/// [`classify_transport_error`] sorts them into the small taxonomy below.
/// Streaming processors surface these to the caller as the final stream
/// item; collect processors log and swallow them, returning whatever
/// partial content accumulated.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Stream idle timeout after {idle_seconds}s")]
    IdleTimeout { idle_seconds: f64 },
    #[error("Upstream connection closed unexpectedly: {0}")]
    UpstreamClosed(String),
    #[error("Upstream request failed: {0}")]
    UpstreamRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// HTTP status code a transport-speaking caller should map this to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::IdleTimeout { .. } => 504,
            EngineError::UpstreamClosed(_) | EngineError::UpstreamRequest(_) => 502,
            EngineError::Internal(_) => 500,
        }
    }
}

/// Whether a transport error message matches known HTTP/2 mid-stream reset
/// signatures.
#[must_use]
pub fn is_stream_reset_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("http/2") || lower.contains("curl: (92)") || lower.contains("stream")
}

/// Classify a raw transport failure message into the engine taxonomy.
#[must_use]
pub fn classify_transport_error(message: &str) -> EngineError {
    if is_stream_reset_signature(message) {
        EngineError::UpstreamClosed(message.to_string())
    } else {
        EngineError::UpstreamRequest(message.to_string())
    }
}
