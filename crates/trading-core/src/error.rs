use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Why a single predictor produced no vote. Never fatal to the cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl PredictorError {
    /// Quota and availability failures move on to the next model in a chain.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PredictorError::Quota(_) | PredictorError::Unavailable(_))
    }
}

pub type PredictorResult<T> = Result<T, PredictorError>;
