//! Error types for cohort-risk.

use thiserror::Error;

/// Risk configuration errors.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid risk configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for risk operations.
pub type RiskResult<T> = Result<T, RiskError>;
