//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur on an order path.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Broker communication error
    #[error("Broker error: {0}")]
    Broker(String),

    /// Order was rejected by the broker
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Order journal error
    #[error("Order journal error: {0}")]
    Journal(String),

    /// Client order id already submitted (idempotency check)
    #[error("Order already submitted: {0}")]
    AlreadySubmitted(String),

    /// Broker endpoint outside the allow-list
    #[error("Endpoint not allowed: {endpoint} (must contain '{allowed}')")]
    EndpointNotAllowed {
        /// Endpoint the broker would call
        endpoint: String,
        /// Required substring
        allowed: String,
    },

    /// Safety ceiling refused the order
    #[error("Safety violation: {0}")]
    Safety(#[from] tripwire_engine::SafetyViolation),

    /// Credential source error
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
