use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// The pagination cursor could not be decoded.
    #[error("invalid cursor")]
    InvalidCursor,

    /// A stored row did not decode into its domain type.
    #[error("invalid row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, StoreError>;
