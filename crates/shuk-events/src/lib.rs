//! # Shuk Events
//!
//! Upload events and the delivery primitives they travel through.
//!
//! ## Overview
//!
//! The shuk-events crate handles:
//! - **Upload Events**: the normalized `UploadEvent` every component shares
//! - **Event Source Adapter**: parsing object-store notifications
//! - **Fan-out Topic**: broadcast delivery to independent subscribers
//! - **Work Queue**: competing-consumer buffering for metadata extraction
//!
//! ## Features
//!
//! - `memory` (default): in-memory topic and queue for single-process use
//! - `redis`: Redis-backed work queue for multi-process deployments
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shuk_events::{MemoryTopic, MemoryWorkQueue, QueueSubscriber, Topic, UploadEvent};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let topic = MemoryTopic::new("upload-topic");
//!     let queue = Arc::new(MemoryWorkQueue::new("metadata-queue"));
//!
//!     topic
//!         .register_subscriber(Arc::new(QueueSubscriber::new(queue.clone())))
//!         .await
//!         .unwrap();
//!
//!     let event = UploadEvent::try_new("videos", "clip.mp4").unwrap();
//!     topic.publish(event).await.unwrap();
//! }
//! ```
//!
//! ## Delivery Semantics
//!
//! Both the topic and the queue are at-least-once. Topic subscribers are
//! redelivered to after a failure and queue messages reappear when not
//! acknowledged in time, so every consumer must tolerate duplicates.

pub mod error;
pub mod notification;
pub mod queue;
pub mod topic;
pub mod types;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use error::{BusError, BusResult};
pub use notification::{parse_notification, NotificationError};
pub use queue::{MemoryWorkQueue, QueueConfig, QueueDepth, QueueMessage, QueueSubscriber, WorkQueue};
pub use topic::{MemoryTopic, Subscriber, Subscription, Topic, TopicConfig, TopicStats};
pub use types::{EventType, UploadEvent, OBJECT_STORE_SOURCE};

#[cfg(feature = "redis")]
pub use crate::redis::RedisWorkQueue;
