use thiserror::Error;

/// Why a completion call did not produce text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("could not reach model endpoint {endpoint}: {message}")]
    Connect { endpoint: String, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("model endpoint returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("unexpected completion payload: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Transient failures a caller may reasonably try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Timeout { .. }
            | CompletionError::Connect { .. }
            | CompletionError::Transport(_)
            | CompletionError::Stream(_) => true,
            CompletionError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            CompletionError::Malformed(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
