//! Signal error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SignalResult<T> = Result<T, SignalError>;
