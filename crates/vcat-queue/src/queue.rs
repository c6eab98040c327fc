//! Broker client using Redis Streams.
//!
//! A queue is a stream with a single consumer group. Publishing appends to the
//! stream; consumers read through the group so every message stays pending
//! until it is explicitly acknowledged.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::consumer::{Consumer, Delivery, Disposition, Settler};
use crate::error::{QueueError, QueueResult};
use crate::publisher::MessagePublisher;

/// Stream field holding the JSON payload.
pub(crate) const PAYLOAD_FIELD: &str = "payload";

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Consumer group shared by all consumers of a queue
    pub consumer_group: String,
    /// Maximum connection attempts before giving up
    pub connect_retries: u32,
    /// Fixed delay between connection attempts
    pub retry_interval: Duration,
    /// How long a read blocks waiting for new messages
    pub block_ms: u64,
    /// Delay before a message refused for backpressure is requeued
    pub requeue_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: "vcat:workers".to_string(),
            connect_retries: 10,
            retry_interval: Duration::from_secs(5),
            block_ms: 1000,
            requeue_delay: Duration::from_millis(500),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vcat:workers".to_string()),
            connect_retries: std::env::var("BROKER_CONNECT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            retry_interval: Duration::from_millis(
                std::env::var("BROKER_RETRY_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            block_ms: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            requeue_delay: Duration::from_millis(
                std::env::var("QUEUE_REQUEUE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
        }
    }
}

/// Connected broker client.
///
/// The publishing connection is shared by every task of the process and is
/// guarded by a mutex so frame writes never interleave. Consumers get their own
/// connection so a blocking read never stalls publishers.
pub struct Broker {
    client: redis::Client,
    publisher: Mutex<MultiplexedConnection>,
    config: QueueConfig,
}

impl Broker {
    /// Connect with bounded, fixed-interval retries.
    ///
    /// Fails with [`QueueError::ConnectionExhausted`] once `connect_retries`
    /// attempts have failed.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let max_attempts = config.connect_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            info!(attempt, max_attempts, "Connecting to broker");

            match open_connection(&client).await {
                Ok(conn) => {
                    info!("Broker connection established");
                    return Ok(Self {
                        client,
                        publisher: Mutex::new(conn),
                        config,
                    });
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Broker connection failed, retrying in {:?}",
                        config.retry_interval
                    );
                    tokio::time::sleep(config.retry_interval).await;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "Giving up on broker connection");
                    return Err(QueueError::ConnectionExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Get the broker configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Declare a durable queue. Safe to call repeatedly.
    pub async fn declare_queue(&self, queue: &str) -> QueueResult<()> {
        let mut conn = self.publisher.lock().await;

        // Start at 0 so messages published before the group existed are delivered
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(()) => info!(queue, group = %self.config.consumer_group, "Declared queue"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue, "Queue already declared");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Publish a message, returning the broker-assigned message id.
    pub async fn publish<T: Serialize + ?Sized>(&self, queue: &str, message: &T) -> QueueResult<String> {
        let payload = serde_json::to_string(message)?;
        self.publish_raw(queue, &payload).await
    }

    async fn publish_raw(&self, queue: &str, payload: &str) -> QueueResult<String> {
        let mut conn = self.publisher.lock().await;

        let message_id: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut *conn)
            .await?;

        debug!(queue, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    /// Open a consumer on `queue` with its own connection.
    ///
    /// `consumer_name` should be stable across restarts of the same process:
    /// the consumer first re-delivers whatever it left pending before a crash.
    pub async fn consumer(&self, queue: &str, consumer_name: &str) -> QueueResult<Consumer> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Consumer::new(
            conn,
            queue,
            &self.config.consumer_group,
            consumer_name,
            self.config.block_ms,
        ))
    }

    /// Acknowledge a delivery (permanently remove it).
    pub async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.publisher.lock().await;

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&delivery.queue)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&delivery.queue)
            .arg(&delivery.message_id)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;

        debug!(queue = %delivery.queue, message_id = %delivery.message_id, "Acknowledged message");
        Ok(())
    }

    /// Return a delivery to the tail of its queue.
    pub async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        self.publish_raw(&delivery.queue, &delivery.payload).await?;
        self.ack(delivery).await
    }

    /// Move a delivery to the queue's dead-letter stream.
    pub async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        {
            let mut conn = self.publisher.lock().await;
            redis::cmd("XADD")
                .arg(dead_letter_queue(&delivery.queue))
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&delivery.payload)
                .arg("reason")
                .arg(reason)
                .arg("original_id")
                .arg(&delivery.message_id)
                .query_async::<()>(&mut *conn)
                .await?;
        }
        self.ack(delivery).await?;

        warn!(queue = %delivery.queue, message_id = %delivery.message_id, reason, "Dead-lettered message");
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self, queue: &str) -> QueueResult<u64> {
        let mut conn = self.publisher.lock().await;
        let len: u64 = redis::cmd("XLEN").arg(queue).query_async(&mut *conn).await?;
        Ok(len)
    }
}

#[async_trait]
impl Settler for Broker {
    /// Resolve a delivery according to a handler's decision.
    async fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> QueueResult<()> {
        match disposition {
            Disposition::Ack => self.ack(delivery).await,
            Disposition::Requeue => self.requeue(delivery).await,
            Disposition::Reject(reason) => self.dead_letter(delivery, reason).await,
        }
    }
}

#[async_trait]
impl MessagePublisher for Broker {
    async fn publish_payload(&self, queue: &str, payload: String) -> QueueResult<()> {
        self.publish_raw(queue, &payload).await.map(|_| ())
    }
}

/// Name of the dead-letter stream for `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}:dead", queue)
}

async fn open_connection(client: &redis::Client) -> redis::RedisResult<MultiplexedConnection> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("PING").query_async::<String>(&mut conn).await?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.connect_retries, 10);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.consumer_group, "vcat:workers");
    }

    #[test]
    fn test_dead_letter_queue_name() {
        assert_eq!(dead_letter_queue("transcode_queue"), "transcode_queue:dead");
    }

    #[tokio::test]
    async fn test_connect_exhausts_retries() {
        let config = QueueConfig {
            // Port 1 is never a Redis server
            redis_url: "redis://127.0.0.1:1".to_string(),
            connect_retries: 2,
            retry_interval: Duration::from_millis(10),
            ..Default::default()
        };

        match Broker::connect(config).await {
            Err(QueueError::ConnectionExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
