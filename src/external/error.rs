use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ollama error: {0}")]
    OllamaError(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExternalError {
    /// Errors worth retrying with the same request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExternalError::ConnectionError(_)
                | ExternalError::OllamaError(_)
                | ExternalError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        ExternalError::ConnectionError(err.to_string())
    }
}
