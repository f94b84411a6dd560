//! Durable work queue
//!
//! Point-to-point buffer between the fan-out topic and the metadata
//! consumers. Every message goes to exactly one `dequeue` caller; a message
//! that is not acknowledged within the visibility timeout becomes visible
//! again, so delivery is at-least-once.

use crate::error::{BusError, BusResult};
use crate::topic::Subscriber;
use crate::types::UploadEvent;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A message handed to one consumer.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Receipt handle used to acknowledge the message
    pub receipt: String,
    /// The buffered event
    pub event: UploadEvent,
    /// How many times this message has been handed out
    pub receive_count: u32,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Messages waiting to be dequeued
    pub visible: usize,
    /// Messages dequeued but not yet acknowledged
    pub in_flight: usize,
}

/// Work queue trait.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Buffer an event.
    async fn enqueue(&self, event: UploadEvent) -> BusResult<()>;

    /// Take the next visible message, if any.
    async fn dequeue(&self) -> BusResult<Option<QueueMessage>>;

    /// Acknowledge a message so it is never redelivered.
    async fn ack(&self, receipt: &str) -> BusResult<()>;

    /// Current depth.
    async fn depth(&self) -> BusResult<QueueDepth>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeued message stays hidden before redelivery
    pub visibility_timeout: Duration,

    /// Messages older than this are discarded instead of delivered
    pub retention: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retention: Some(Duration::from_secs(4 * 24 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    event: UploadEvent,
    enqueued_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, (Entry, Instant)>,
}

/// In-memory work queue.
#[derive(Debug)]
pub struct MemoryWorkQueue {
    name: String,
    state: Mutex<QueueState>,
    config: QueueConfig,
}

impl MemoryWorkQueue {
    /// Create a queue with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, QueueConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            config,
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.config
            .retention
            .is_some_and(|retention| now.duration_since(entry.enqueued_at) > retention)
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, event: UploadEvent) -> BusResult<()> {
        let mut state = self.state.lock().await;
        tracing::debug!(queue = %self.name, event_id = %event.id(), "Event enqueued");
        state.ready.push_back(Entry {
            event,
            enqueued_at: Instant::now(),
            receive_count: 0,
        });
        Ok(())
    }

    async fn dequeue(&self) -> BusResult<Option<QueueMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        // Return timed-out in-flight messages to the ready list
        let timed_out: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in timed_out {
            if let Some((entry, _)) = state.in_flight.remove(&receipt) {
                tracing::debug!(
                    queue = %self.name,
                    event_id = %entry.event.id(),
                    "Visibility timeout elapsed, message visible again"
                );
                state.ready.push_back(entry);
            }
        }

        while let Some(mut entry) = state.ready.pop_front() {
            if self.is_expired(&entry, now) {
                tracing::info!(
                    queue = %self.name,
                    event_id = %entry.event.id(),
                    "Message expired before consumption"
                );
                continue;
            }

            entry.receive_count += 1;
            let receipt = uuid::Uuid::now_v7().to_string();
            let message = QueueMessage {
                receipt: receipt.clone(),
                event: entry.event.clone(),
                receive_count: entry.receive_count,
            };
            state
                .in_flight
                .insert(receipt, (entry, now + self.config.visibility_timeout));

            return Ok(Some(message));
        }

        Ok(None)
    }

    async fn ack(&self, receipt: &str) -> BusResult<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| BusError::UnknownReceipt(receipt.to_string()))
    }

    async fn depth(&self) -> BusResult<QueueDepth> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            visible: state.ready.len(),
            in_flight: state.in_flight.len(),
        })
    }
}

/// Topic subscriber that buffers every delivered event into a work queue.
pub struct QueueSubscriber {
    queue: Arc<dyn WorkQueue>,
}

impl QueueSubscriber {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

impl std::fmt::Debug for QueueSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSubscriber")
            .field("queue", &self.queue.name())
            .finish()
    }
}

#[async_trait]
impl Subscriber for QueueSubscriber {
    fn name(&self) -> &str {
        self.queue.name()
    }

    async fn deliver(&self, event: UploadEvent) -> BusResult<()> {
        self.queue.enqueue(event).await
    }
}
