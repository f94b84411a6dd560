//! Error types for the event layer.

use thiserror::Error;

/// Errors raised by events, topics and queues.
#[derive(Debug, Error)]
pub enum BusError {
    /// Event failed its invariants
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Failed to publish event
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// A subscriber could not accept delivery
    #[error("Subscriber {subscriber} unavailable: {message}")]
    SubscriberUnavailable {
        /// Subscriber name
        subscriber: String,
        /// Error message
        message: String,
    },

    /// Queue operation failed
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Receipt does not match an in-flight message
    #[error("Unknown receipt: {0}")]
    UnknownReceipt(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event layer operations.
pub type BusResult<T> = Result<T, BusError>;

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::SerializationError(err.to_string())
    }
}
