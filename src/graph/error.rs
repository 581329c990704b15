use thiserror::Error;

use crate::external::ExternalError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to parse extraction output: {0}")]
    ExtractionParse(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("No entity in the graph matches: {0}")]
    NoMatchingEntity(String),

    #[error("Language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Document source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphError {
    /// Whether repeating the same write may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::StoreWrite(_))
    }

    pub(crate) fn invalid_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<ExternalError> for GraphError {
    fn from(err: ExternalError) -> Self {
        GraphError::LlmUnavailable(err.to_string())
    }
}
