//! Executor error types.

use thiserror::Error;

use cohort_venue::VenueError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error("No position on {0}")]
    NoPosition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
