//! Error types for the ratecurb guard.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for ratecurb operations.
#[derive(Error, Debug)]
pub enum RatecurbError {
    /// Invalid policy or guard configuration.
    ///
    /// Raised when a guard is registered or a policy is built, never while
    /// a decision is being made.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store failed to respond.
    ///
    /// Per-call and recoverable: the host decides whether to fail open
    /// (treat as allowed) or fail closed (treat as denied).
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for ratecurb operations.
pub type Result<T> = std::result::Result<T, RatecurbError>;
