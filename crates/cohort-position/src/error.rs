//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Invalid position state: {0}")]
    InvalidState(String),

    /// A protection action failed at the venue boundary.
    #[error("Protection action failed: {0}")]
    Action(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PositionResult<T> = Result<T, PositionError>;
