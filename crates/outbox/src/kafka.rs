//! Kafka publisher.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::error::PublishError;
use crate::publisher::Publisher;

/// Publishes bus envelopes to a single Kafka topic, keyed by aggregate id so
/// the hash partitioner keeps per-aggregate ordering.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    /// Connects a producer to the comma-separated broker list.
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, PublishError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "1")
            .set("linger.ms", "50")
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), PublishError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(value);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _message)| PublishError::Kafka(err))?;

        Ok(())
    }
}
