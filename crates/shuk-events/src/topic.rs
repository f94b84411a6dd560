//! Fan-out topic
//!
//! A topic broadcasts every published upload event to every current
//! subscriber. Each subscriber gets its own copy and its own delivery task,
//! so a slow or failing subscriber never holds up the others or the
//! publisher.

use crate::error::{BusError, BusResult};
use crate::types::UploadEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Subscription handle for pulling events from a topic.
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Event receiver
    pub receiver: broadcast::Receiver<UploadEvent>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Receive the next event.
    ///
    /// A receiver that fell behind skips the overwritten events and keeps
    /// going; only a closed topic ends the subscription.
    pub async fn recv(&mut self) -> BusResult<UploadEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscription = %self.id, skipped, "Subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::ChannelClosed),
            }
        }
    }
}

/// Push-style topic consumer.
///
/// Deliveries are at-least-once: the topic redelivers after a failure, so
/// implementations must tolerate duplicates.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name used in logs and stats.
    fn name(&self) -> &str;

    /// Accept one event.
    async fn deliver(&self, event: UploadEvent) -> BusResult<()>;
}

/// Fan-out topic trait.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Topic name.
    fn name(&self) -> &str;

    /// Publish an event to every current subscriber.
    async fn publish(&self, event: UploadEvent) -> BusResult<()>;

    /// Open a pull subscription. Dropping it detaches the subscriber.
    async fn subscribe(&self) -> BusResult<Subscription>;

    /// Register a push subscriber.
    async fn register_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> BusResult<()>;

    /// Remove a push subscriber by name.
    async fn unregister_subscriber(&self, name: &str) -> BusResult<()>;

    /// Get topic stats.
    async fn stats(&self) -> TopicStats;
}

/// Topic statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStats {
    /// Total events published
    pub events_published: u64,
    /// Successful push deliveries
    pub events_delivered: u64,
    /// Push deliveries abandoned after redelivery ran out
    pub delivery_failures: u64,
    /// Open pull subscriptions
    pub active_subscriptions: usize,
    /// Registered push subscribers
    pub registered_subscribers: usize,
}

/// Topic configuration.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Broadcast channel capacity for pull subscriptions
    pub channel_capacity: usize,

    /// Redeliveries after a failed push delivery
    pub redelivery_attempts: u32,

    /// Delay between redeliveries
    pub redelivery_delay: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            redelivery_attempts: 2,
            redelivery_delay: Duration::from_secs(1),
        }
    }
}

/// In-memory fan-out topic.
///
/// Suitable for single-process deployments and testing.
pub struct MemoryTopic {
    /// Topic name
    name: String,
    /// Broadcast sender backing pull subscriptions
    sender: broadcast::Sender<UploadEvent>,
    /// Registered push subscribers
    subscribers: Arc<RwLock<Vec<Arc<dyn Subscriber>>>>,
    /// Statistics
    stats: Arc<RwLock<TopicStats>>,
    /// Configuration
    config: TopicConfig,
}

impl std::fmt::Debug for MemoryTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTopic")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl MemoryTopic {
    /// Create a new in-memory topic with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, TopicConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(name: impl Into<String>, config: TopicConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            name: name.into(),
            sender,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(RwLock::new(TopicStats::default())),
            config,
        }
    }
}

/// Deliver one event to one subscriber, redelivering on failure.
async fn deliver_with_redelivery(
    topic: String,
    subscriber: Arc<dyn Subscriber>,
    event: UploadEvent,
    config: TopicConfig,
    stats: Arc<RwLock<TopicStats>>,
) {
    let mut attempt = 0;

    loop {
        attempt += 1;

        match subscriber.deliver(event.clone()).await {
            Ok(()) => {
                stats.write().await.events_delivered += 1;
                return;
            }
            Err(e) if attempt > config.redelivery_attempts => {
                tracing::error!(
                    topic = %topic,
                    subscriber = subscriber.name(),
                    event_id = %event.id(),
                    attempts = attempt,
                    error = %e,
                    "Delivery abandoned"
                );
                stats.write().await.delivery_failures += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    subscriber = subscriber.name(),
                    event_id = %event.id(),
                    attempt,
                    error = %e,
                    "Delivery failed, redelivering"
                );
                tokio::time::sleep(config.redelivery_delay).await;
            }
        }
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: UploadEvent) -> BusResult<()> {
        {
            let mut stats = self.stats.write().await;
            stats.events_published += 1;
        }

        // No pull subscribers is not an error
        let _ = self.sender.send(event.clone());

        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            tokio::spawn(deliver_with_redelivery(
                self.name.clone(),
                subscriber.clone(),
                event.clone(),
                self.config.clone(),
                self.stats.clone(),
            ));
        }

        tracing::debug!(
            topic = %self.name,
            event_id = %event.id(),
            subscribers = subscribers.len(),
            "Event published"
        );

        Ok(())
    }

    async fn subscribe(&self) -> BusResult<Subscription> {
        Ok(Subscription {
            id: uuid::Uuid::now_v7().to_string(),
            receiver: self.sender.subscribe(),
        })
    }

    async fn register_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> BusResult<()> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.iter().any(|s| s.name() == subscriber.name()) {
            return Err(BusError::PublishError(format!(
                "subscriber {} already registered on {}",
                subscriber.name(),
                self.name
            )));
        }

        tracing::info!(topic = %self.name, subscriber = subscriber.name(), "Subscriber registered");
        subscribers.push(subscriber);

        Ok(())
    }

    async fn unregister_subscriber(&self, name: &str) -> BusResult<()> {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| s.name() != name);
        Ok(())
    }

    async fn stats(&self) -> TopicStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_subscriptions = self.sender.receiver_count();
        stats.registered_subscribers = self.subscribers.read().await.len();
        stats
    }
}
