//! Saga error types.

use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Step numbers must be strictly increasing starting at 1.
    #[error("invalid steps: {0}")]
    InvalidSteps(String),

    /// An action or compensation handler reported failure.
    #[error("{0}")]
    Action(String),

    /// A stored row did not decode into its state type.
    #[error("invalid row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
