use thiserror::Error;

/// Error taxonomy: Transient (retry), Input (4xx, no retry), Contract
/// (internal invariant violation, fatal in dev / degraded in prod),
/// Systemic (degraded response, logged as analytics warnings).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("systemic: {0}")]
    Systemic(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}
