//! Publisher seam between the relay and the message bus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PublishError;

/// Hands one keyed message to the bus.
///
/// The key is the aggregate id, so the bus partitioner preserves
/// per-aggregate ordering.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), PublishError>;
}

/// A message captured by [`MockPublisher`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub key: String,
    pub value: Vec<u8>,
}

/// Records publishes and can be scripted to fail, for relay tests.
#[derive(Clone, Default)]
pub struct MockPublisher {
    published: Arc<RwLock<Vec<PublishedMessage>>>,
    fail_remaining: Arc<RwLock<u32>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publish calls fail.
    pub async fn fail_next(&self, n: u32) {
        *self.fail_remaining.write().await = n;
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, key: &str, value: &[u8]) -> Result<(), PublishError> {
        {
            let mut remaining = self.fail_remaining.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PublishError::Bus("scripted publish failure".to_string()));
            }
        }
        self.published.write().await.push(PublishedMessage {
            key: key.to_string(),
            value: value.to_vec(),
        });

        Ok(())
    }
}
