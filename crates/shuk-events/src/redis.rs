//! Redis-backed work queue for multi-process deployments.
//!
//! Messages live in a Redis list. `dequeue` atomically moves a message onto
//! a per-queue processing list (`LMOVE`), so a consumer that dies before
//! acknowledging leaves the message recoverable with
//! [`RedisWorkQueue::requeue_in_flight`].
//! Payloads that fail to decode are parked on a `:dead` list instead.

use crate::error::{BusError, BusResult};
use crate::queue::{QueueDepth, QueueMessage, WorkQueue};
use crate::types::UploadEvent;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};

/// Serialized queue entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    receipt: String,
    event: UploadEvent,
}

/// Redis work queue.
///
/// # Example
///
/// ```rust,no_run
/// use shuk_events::{RedisWorkQueue, WorkQueue};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let queue = RedisWorkQueue::new("redis://localhost:6379", "shuk", "metadata").await?;
///     while let Some(message) = queue.dequeue().await? {
///         queue.ack(&message.receipt).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct RedisWorkQueue {
    /// Redis client
    client: Client,
    /// Queue name
    name: String,
    /// Key prefix for all Redis operations
    prefix: String,
}

impl std::fmt::Debug for RedisWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWorkQueue")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisWorkQueue {
    /// Connect to Redis and verify the connection.
    pub async fn new(redis_url: &str, prefix: &str, name: &str) -> BusResult<Self> {
        let client =
            Client::open(redis_url).map_err(|e| BusError::ConnectionError(e.to_string()))?;

        // Test connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            name: name.to_string(),
            prefix: prefix.to_string(),
        })
    }

    fn ready_key(&self) -> String {
        format!("{}:queue:{}:ready", self.prefix, self.name)
    }

    fn processing_key(&self) -> String {
        format!("{}:queue:{}:processing", self.prefix, self.name)
    }

    fn payloads_key(&self) -> String {
        format!("{}:queue:{}:payloads", self.prefix, self.name)
    }

    fn receives_key(&self) -> String {
        format!("{}:queue:{}:receives", self.prefix, self.name)
    }

    fn dead_key(&self) -> String {
        format!("{}:queue:{}:dead", self.prefix, self.name)
    }

    /// Pull an undecodable payload out of the processing list so it is
    /// never redelivered, parking it on the dead list.
    async fn quarantine(&self, conn: &mut MultiplexedConnection, payload: &str) -> BusResult<()> {
        redis::pipe()
            .atomic()
            .lrem(self.processing_key(), 1, payload)
            .ignore()
            .lpush(self.dead_key(), payload)
            .ignore()
            .query_async::<_, ()>(conn)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))
    }

    async fn connection(&self) -> BusResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }

    /// Move every unacknowledged message back onto the ready list.
    ///
    /// Returns the number of messages requeued.
    pub async fn requeue_in_flight(&self) -> BusResult<usize> {
        let mut conn = self.connection().await?;
        let mut moved = 0;

        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(self.processing_key())
                .arg(self.ready_key())
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(|e| BusError::QueueError(e.to_string()))?;

            match payload {
                Some(_) => moved += 1,
                None => break,
            }
        }

        if moved > 0 {
            tracing::info!(queue = %self.name, moved, "Requeued in-flight messages");
        }

        Ok(moved)
    }
}

fn decode(payload: &str) -> BusResult<StoredMessage> {
    Ok(serde_json::from_str(payload)?)
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, event: UploadEvent) -> BusResult<()> {
        let mut conn = self.connection().await?;
        let stored = StoredMessage {
            receipt: uuid::Uuid::now_v7().to_string(),
            event,
        };
        let payload = serde_json::to_string(&stored)?;

        redis::pipe()
            .atomic()
            .hset(self.payloads_key(), &stored.receipt, &payload)
            .ignore()
            .lpush(self.ready_key(), &payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;

        tracing::debug!(queue = %self.name, event_id = %stored.event.id(), "Event enqueued to Redis");

        Ok(())
    }

    async fn dequeue(&self) -> BusResult<Option<QueueMessage>> {
        let mut conn = self.connection().await?;

        let payload: Option<String> = redis::cmd("LMOVE")
            .arg(self.ready_key())
            .arg(self.processing_key())
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let stored = match decode(&payload) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    queue = %self.name,
                    error = %e,
                    "Undecodable message moved to dead list"
                );
                self.quarantine(&mut conn, &payload).await?;
                return Err(e);
            }
        };

        let receive_count: u32 = conn
            .hincr(self.receives_key(), &stored.receipt, 1)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;

        Ok(Some(QueueMessage {
            receipt: stored.receipt,
            event: stored.event,
            receive_count,
        }))
    }

    async fn ack(&self, receipt: &str) -> BusResult<()> {
        let mut conn = self.connection().await?;

        let payload: Option<String> = conn
            .hget(self.payloads_key(), receipt)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;
        let payload = payload.ok_or_else(|| BusError::UnknownReceipt(receipt.to_string()))?;

        let removed: i64 = conn
            .lrem(self.processing_key(), 1, &payload)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;
        if removed == 0 {
            return Err(BusError::UnknownReceipt(receipt.to_string()));
        }

        redis::pipe()
            .atomic()
            .hdel(self.payloads_key(), receipt)
            .ignore()
            .hdel(self.receives_key(), receipt)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;

        Ok(())
    }

    async fn depth(&self) -> BusResult<QueueDepth> {
        let mut conn = self.connection().await?;

        let visible: usize = conn
            .llen(self.ready_key())
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;
        let in_flight: usize = conn
            .llen(self.processing_key())
            .await
            .map_err(|e| BusError::QueueError(e.to_string()))?;

        Ok(QueueDepth { visible, in_flight })
    }
}
