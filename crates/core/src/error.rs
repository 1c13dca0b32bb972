use crossload_api::DelegationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrossloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for CrossloadError {
    fn from(err: tokio::task::JoinError) -> Self {
        CrossloadError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CrossloadError>;
