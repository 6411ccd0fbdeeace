use thiserror::Error;

/// Failure of an oracle backend. The builder treats any of these as "no decision".
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle backend not configured: {0}")]
    Config(String),
    #[error("Oracle request failed: {0}")]
    Request(String),
    #[error("Oracle timed out after {0}ms")]
    Timeout(u64),
    #[error("Failed to parse oracle response: {0}")]
    Parse(String),
    #[error("Oracle does not support: {0}")]
    NotSupported(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout(0)
        } else {
            OracleError::Request(err.to_string())
        }
    }
}
