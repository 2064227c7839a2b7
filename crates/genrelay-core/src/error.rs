//! # Error Hierarchy
//!
//! Structured error types for the core crate, built with `thiserror`.
//! No `Box<dyn Error>`, no `.unwrap()` outside tests.

use thiserror::Error;

/// Top-level error type for genrelay-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Attempt state machine violation.
    #[error("state transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// The cache backend failed to read or write.
    #[error("cache error for key \"{key}\": {reason}")]
    Cache {
        /// The cache key involved.
        key: String,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// A request field failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors during attempt state transitions.
#[derive(Error, Debug)]
pub enum StateTransitionError {
    /// The attempt already reached a terminal state.
    #[error("invalid transition for attempt {attempt} from {from} to {to}")]
    InvalidTransition {
        /// The attempt number.
        attempt: u32,
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_names_key() {
        let err = CoreError::Cache {
            key: "genrelay.current_user".into(),
            reason: "disk full".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("genrelay.current_user"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn transition_error_converts_into_core_error() {
        let err: CoreError = StateTransitionError::InvalidTransition {
            attempt: 2,
            from: "Success".into(),
            to: "FatalFailure".into(),
        }
        .into();
        assert!(matches!(err, CoreError::StateTransition(_)));
        assert!(err.to_string().contains("attempt 2"));
    }

    #[test]
    fn json_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CoreError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
