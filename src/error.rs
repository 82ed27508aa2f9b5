//! Error types for Warden
//!
//! Centralized error handling using thiserror.
//!
//! Only validation and unavailable-instance errors are surfaced to direct
//! callers; process-lifecycle failures are absorbed into the supervisor's
//! state machine and reported asynchronously via events.

use thiserror::Error;

/// All error types that can occur in Warden
#[derive(Debug, Error)]
pub enum WardenError {
    /// Spawn input rejected by the validator
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Instance could not be made running and has no usable input stream
    #[error("Instance unavailable: {0}")]
    Unavailable(String),

    /// Instance key is not part of the configured set
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    /// OS-level spawn error
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
