use thiserror::Error;

/// Configuration errors that abort a build before any step runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Invalid target URL: {0:?}")]
    InvalidTarget(String),
    #[error("Capture contains no requests")]
    EmptyCapture,
    #[error("Step bound must be at least 1")]
    ZeroStepBound,
    #[error("Invalid input variable name: {0:?}")]
    InvalidInputName(String),
}
