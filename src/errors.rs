use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenoflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for GenoflowError {
    fn from(err: std::io::Error) -> Self {
        GenoflowError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GenoflowError {
    fn from(err: serde_json::Error) -> Self {
        GenoflowError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for GenoflowError {
    fn from(err: anyhow::Error) -> Self {
        GenoflowError::Storage(err.to_string())
    }
}
