//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] cohort_core::CoreError),

    #[error("Venue error: {0}")]
    Venue(#[from] cohort_venue::VenueError),

    #[error("Risk error: {0}")]
    Risk(#[from] cohort_risk::RiskError),

    #[error("Position error: {0}")]
    Position(#[from] cohort_position::PositionError),

    #[error("Signal error: {0}")]
    Signal(#[from] cohort_signal::SignalError),

    #[error("Executor error: {0}")]
    Executor(#[from] cohort_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] cohort_telemetry::TelemetryError),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
