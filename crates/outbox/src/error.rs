use thiserror::Error;

/// A failed attempt to hand one message to the bus.
///
/// Publish failures are transient from the relay's point of view: the row is
/// rescheduled and the error string recorded on it.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The Kafka client reported an error.
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Any other bus failure.
    #[error("{0}")]
    Bus(String),
}

/// Errors that abort a relay tick. Individual publish failures do not.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An envelope failed to serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
