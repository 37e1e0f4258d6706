//! Venue error taxonomy.
//!
//! Every venue rejection carries a numeric code. The static table below maps
//! known codes to an `ErrorAction`; transient codes are retried with the
//! table's delay, structural codes are never retried.

use std::time::Duration;

use thiserror::Error;

/// What the caller should do with a failed venue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Transient: retry, optionally waiting at least `delay`.
    Retry { delay: Option<Duration> },
    /// Structural: drop this action for this cycle.
    Skip,
    /// Structural: abandon this order shape and take the caller's fallback path.
    Fallback,
    /// Structural: fail the operation.
    Fail,
}

impl ErrorAction {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

struct CodeEntry {
    code: i32,
    action: ErrorAction,
    description: &'static str,
}

const fn retry_after(ms: u64) -> ErrorAction {
    ErrorAction::Retry {
        delay: Some(Duration::from_millis(ms)),
    }
}

// Each code appears exactly once. -1021 is order timing; position-not-synced
// reduce-only rejections are -2022.
static ERROR_CODE_TABLE: &[CodeEntry] = &[
    // Transient
    CodeEntry { code: -1001, action: retry_after(1_000), description: "disconnected" },
    CodeEntry { code: -1003, action: retry_after(2_000), description: "rate limited" },
    CodeEntry { code: -1007, action: retry_after(1_000), description: "backend timeout" },
    CodeEntry { code: -1021, action: retry_after(1_000), description: "order timing outside recv window" },
    CodeEntry { code: -2022, action: retry_after(2_000), description: "reduce-only rejected, position not synced" },
    // Structural
    CodeEntry { code: -1111, action: ErrorAction::Fail, description: "precision over maximum" },
    CodeEntry { code: -1013, action: ErrorAction::Fail, description: "filter failure" },
    CodeEntry { code: -4164, action: ErrorAction::Fail, description: "notional below minimum" },
    CodeEntry { code: -2019, action: ErrorAction::Skip, description: "insufficient margin" },
    CodeEntry { code: -2011, action: ErrorAction::Skip, description: "unknown order id" },
    CodeEntry { code: -4045, action: ErrorAction::Fallback, description: "max open orders reached" },
    CodeEntry { code: -4046, action: ErrorAction::Fallback, description: "no need to change margin type" },
    CodeEntry { code: -2021, action: ErrorAction::Fallback, description: "order would immediately trigger" },
    CodeEntry { code: -4116, action: ErrorAction::Fallback, description: "client order id duplicated" },
];

/// Codes after which the venue may or may not have accepted the order.
const AMBIGUOUS_CODES: &[i32] = &[-1001, -1007, -4116];

/// Look up a venue error code in the static table.
///
/// Returns the action and a short description, or `None` for unknown codes.
#[must_use]
pub fn lookup_error_code(code: i32) -> Option<(ErrorAction, &'static str)> {
    ERROR_CODE_TABLE
        .iter()
        .find(|e| e.code == code)
        .map(|e| (e.action, e.description))
}

/// Venue error types.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("Venue rejected request (code {code}): {message}")]
    Api { code: i32, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Venue call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<VenueError>,
    },
}

impl VenueError {
    pub fn api(code: i32, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Venue error code, if this is an API rejection.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Api { code, .. } => Some(*code),
            Self::RetriesExhausted { last, .. } => last.code(),
            _ => None,
        }
    }

    /// Classify this error via the static code table.
    ///
    /// Transport failures and timeouts are transient. Unknown API codes fail.
    #[must_use]
    pub fn action(&self) -> ErrorAction {
        match self {
            Self::Api { code, .. } => lookup_error_code(*code)
                .map(|(action, _)| action)
                .unwrap_or(ErrorAction::Fail),
            Self::Transport(_) | Self::Timeout(_) => ErrorAction::Retry { delay: None },
            Self::UnknownSymbol(_) | Self::RetriesExhausted { .. } => ErrorAction::Fail,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.action().is_retryable()
    }

    /// Whether the request may have been accepted despite the error.
    ///
    /// Lost responses, disconnects and backend timeouts leave the order state
    /// unknown; so does a duplicate client order ID, which means an earlier
    /// attempt went through.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Api { code, .. } => AMBIGUOUS_CODES.contains(code),
            Self::RetriesExhausted { last, .. } => last.is_ambiguous(),
            Self::UnknownSymbol(_) => false,
        }
    }

    /// Whether this is a precision or filter violation.
    #[must_use]
    pub fn is_precision(&self) -> bool {
        matches!(self.code(), Some(-1111 | -1013 | -4164))
    }
}

/// Result type alias for venue operations.
pub type VenueResult<T> = Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in ERROR_CODE_TABLE.iter().enumerate() {
            for b in &ERROR_CODE_TABLE[i + 1..] {
                assert_ne!(a.code, b.code, "duplicate code {}", a.code);
            }
        }
    }

    #[test]
    fn test_timing_and_sync_have_distinct_delays() {
        assert_eq!(
            lookup_error_code(-1021).map(|(a, _)| a),
            Some(ErrorAction::Retry {
                delay: Some(Duration::from_millis(1_000))
            })
        );
        assert_eq!(
            lookup_error_code(-2022).map(|(a, _)| a),
            Some(ErrorAction::Retry {
                delay: Some(Duration::from_millis(2_000))
            })
        );
    }

    #[test]
    fn test_precision_is_never_retryable() {
        let err = VenueError::api(-1111, "Precision is over the maximum defined for this asset.");
        assert!(err.is_precision());
        assert!(!err.is_retryable());
        assert_eq!(err.action(), ErrorAction::Fail);
    }

    #[test]
    fn test_structural_mapping() {
        assert_eq!(VenueError::api(-2019, "margin").action(), ErrorAction::Skip);
        assert_eq!(VenueError::api(-4045, "max orders").action(), ErrorAction::Fallback);
        assert_eq!(VenueError::api(-9999, "???").action(), ErrorAction::Fail);
    }

    #[test]
    fn test_ambiguous_outcomes() {
        assert!(VenueError::Timeout(Duration::from_secs(5)).is_ambiguous());
        assert!(VenueError::api(-1007, "Timeout waiting for response from backend server.").is_ambiguous());
        assert!(VenueError::api(-4116, "ClientOrderId is duplicated.").is_ambiguous());
        assert!(!VenueError::api(-1003, "Too many requests").is_ambiguous());
        assert!(!VenueError::api(-1021, "Timestamp outside recvWindow").is_ambiguous());

        let exhausted = VenueError::RetriesExhausted {
            operation: "place_order".into(),
            attempts: 2,
            last: Box::new(VenueError::Transport("reset".into())),
        };
        assert!(exhausted.is_ambiguous());
    }

    #[test]
    fn test_transport_is_transient() {
        assert!(VenueError::Transport("reset by peer".into()).is_retryable());
        assert!(VenueError::Timeout(Duration::from_secs(5)).is_retryable());
    }
}
