//! Error types for cohort-core.

use thiserror::Error;

/// Core error types.
///
/// These are contract violations: malformed input handed to the core by a
/// collaborator. Callers are expected to fail fast on them.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid signal: {0:?} (expected long, short or hold)")]
    InvalidSignal(String),

    #[error("Invalid confidence: {0} (expected a finite value in [0, 1])")]
    InvalidConfidence(f64),

    #[error("Invalid strategy style: {0:?}")]
    InvalidStyle(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
