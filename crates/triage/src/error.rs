//! Errors returned by the engine's public operations

use thiserror::Error;

use crate::remote::RemoteError;

/// Error type for [`MailService`](crate::MailService) operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Provider transport or auth failure, and no cached data could answer
    #[error("Remote unavailable: {message}")]
    RemoteUnavailable { message: String },

    /// Only surfaced by direct classifier calls; syncs store a default instead
    #[error("Classification failed: {message}")]
    ClassificationFailure { message: String },

    /// Neither semantic nor lexical search could run
    #[error("Search index unavailable: {message}")]
    SearchIndexUnavailable { message: String },

    /// The summarization capability failed; distinct from "no summary yet"
    #[error("Summarization failed: {message}")]
    SummarizationFailure { message: String },

    #[error("Message not found: {id}")]
    NotFound { id: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Storage {
            message: format!("{:#}", err),
        }
    }
}

impl From<RemoteError> for EngineError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound { id } => EngineError::NotFound { id },
            other => EngineError::RemoteUnavailable {
                message: other.to_string(),
            },
        }
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
