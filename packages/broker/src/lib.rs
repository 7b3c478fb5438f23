//! Message queue clients for the batch job system.
//!
//! The consumer only needs three operations from a broker: long-poll
//! receive, acknowledge (delete) and publish. This crate defines that
//! contract and two implementations:
//!
//! - [`MemoryQueue`] - an in-process broker actor with visibility timeouts,
//!   used for tests and local runs
//! - [`SqsQueue`] - Amazon SQS (feature `sqs`, on by default)
//!
//! Clients are created once at startup and shared by cloning.

mod config;
mod memory;
#[cfg(feature = "sqs")]
mod sqs;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub use config::{BrokerBackend, BrokerConfig};
pub use memory::{BrokerMessage, MemoryQueue, MemoryQueueConfig, MemoryQueueStats};
#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

/// Opaque token that acknowledges one particular delivery of a message.
///
/// Every delivery gets a fresh token; once the message becomes visible
/// again the older token stops working.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AckToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned message id, stable across redeliveries.
    pub message_id: String,
    /// Raw message body.
    pub body: String,
    /// Token for acknowledging this delivery.
    pub token: AckToken,
    /// How many times the message has been delivered, this delivery included.
    pub receive_count: u32,
}

/// Queue client errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The token expired (visibility window passed) or was never issued.
    #[error("Invalid acknowledgment: {0}")]
    InvalidAcknowledgment(String),
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
    #[error("SQS error: {0}")]
    Sqs(String),
    #[error(transparent)]
    Config(#[from] batch_core::ConfigError),
}

/// The operations the consumer pipeline and producers use.
pub trait MessageQueue: Clone + Send + Sync + 'static {
    /// Wait up to `wait` for at most `max_messages` messages.
    ///
    /// An empty result after the wait elapses is not an error.
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> impl Future<Output = Result<Vec<ReceivedMessage>, QueueError>> + Send;

    /// Delete the delivered message so it is not redelivered.
    fn acknowledge(&self, token: &AckToken) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Publish a message body, returning the broker's message id.
    fn publish(&self, body: String) -> impl Future<Output = Result<String, QueueError>> + Send;
}
