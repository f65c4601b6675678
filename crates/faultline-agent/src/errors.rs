use faultline_llm::CompletionError;
use thiserror::Error;

/// Per-task failure. Only `ResultLog` is fatal to a whole run.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("generation failed: {0}")]
    Generation(#[from] CompletionError),
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("result log: {0}")]
    ResultLog(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Generation(err) => err.is_retryable(),
            TaskError::MissingResource(_) | TaskError::ResultLog(_) => false,
        }
    }
}
