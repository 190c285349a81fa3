//! Transactional outbox relay.
//!
//! Domain mutations append event rows to the `outbox` table inside their own
//! transaction; the [`Relay`] drains unpublished rows to the message bus on a
//! timer. Delivery is at-least-once: a failed publish only reschedules the
//! row with exponential backoff, and rows locked by a crashed relay become
//! visible again as soon as its transaction aborts.

pub mod envelope;
pub mod error;
pub mod kafka;
pub mod publisher;
pub mod relay;

pub use envelope::Envelope;
pub use error::{PublishError, RelayError};
pub use kafka::KafkaPublisher;
pub use publisher::{MockPublisher, PublishedMessage, Publisher};
pub use relay::Relay;
