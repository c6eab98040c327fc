//! Queue consumption and delivery handling.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::PAYLOAD_FIELD;

/// How a handler resolved a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Permanently remove the message
    Ack,
    /// Put the message back for another delivery
    Requeue,
    /// Drop the message to the dead-letter stream with a reason
    Reject(String),
}

impl Disposition {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }
}

/// A message delivered to a consumer and not yet resolved.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned message id
    pub message_id: String,
    /// Queue the message was read from
    pub queue: String,
    /// Raw JSON payload
    pub payload: String,
    /// Whether this is a re-delivery of a message left pending by a previous run
    pub redelivered: bool,
}

impl Delivery {
    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        serde_json::from_str(&self.payload)
            .map_err(|e| QueueError::InvalidPayload(format!("{} ({})", e, self.message_id)))
    }
}

/// Source of deliveries for a consuming loop.
#[async_trait]
pub trait DeliverySource: Send {
    /// Read up to `count` deliveries; an empty batch means nothing arrived in time.
    async fn next_batch(&mut self, count: usize) -> QueueResult<Vec<Delivery>>;
}

/// Resolves deliveries once a handler has decided their fate.
#[async_trait]
pub trait Settler: Send + Sync {
    async fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> QueueResult<()>;
}

/// Consumer bound to one queue through the consumer group.
///
/// On start the consumer walks its own pending list (messages it received but
/// never resolved before a crash) and only then switches to new messages.
pub struct Consumer {
    conn: MultiplexedConnection,
    queue: String,
    group: String,
    name: String,
    block_ms: u64,
    /// Position in our pending list while recovering, `None` once caught up
    pending_cursor: Option<String>,
}

impl Consumer {
    pub(crate) fn new(
        conn: MultiplexedConnection,
        queue: &str,
        group: &str,
        name: &str,
        block_ms: u64,
    ) -> Self {
        Self {
            conn,
            queue: queue.to_string(),
            group: group.to_string(),
            name: name.to_string(),
            block_ms,
            pending_cursor: Some("0".to_string()),
        }
    }

    /// Queue this consumer reads from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consumer name within the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read up to `count` deliveries.
    ///
    /// Blocks for at most the configured block time when nothing is available
    /// and returns an empty batch. Any Redis failure is reported as
    /// [`QueueError::ConnectionLost`].
    pub async fn next(&mut self, count: usize) -> QueueResult<Vec<Delivery>> {
        let count = count.max(1);

        if let Some(cursor) = self.pending_cursor.clone() {
            let deliveries = self.read(&cursor, count, None).await?;
            match deliveries.last() {
                Some(last) => {
                    self.pending_cursor = Some(last.message_id.clone());
                    info!(
                        queue = %self.queue,
                        count = deliveries.len(),
                        "Recovered pending messages from a previous run"
                    );
                    return Ok(deliveries);
                }
                None => {
                    debug!(queue = %self.queue, "Pending list drained");
                    self.pending_cursor = None;
                }
            }
        }

        self.read(">", count, Some(self.block_ms)).await
    }

    async fn read(&mut self, id: &str, count: usize, block_ms: Option<u64>) -> QueueResult<Vec<Delivery>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.name)
            .arg("COUNT")
            .arg(count);
        if let Some(block_ms) = block_ms {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(&self.queue).arg(id);

        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| QueueError::connection_lost(e.to_string()))?;

        let redelivered = id != ">";
        let mut deliveries = Vec::new();

        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                match self.to_delivery(&entry, redelivered) {
                    Some(delivery) => deliveries.push(delivery),
                    None => {
                        // Pending entry whose body was already deleted
                        warn!(queue = %self.queue, message_id = %entry.id, "Skipping entry without payload");
                        self.discard(&entry.id).await?;
                    }
                }
            }
        }

        Ok(deliveries)
    }

    fn to_delivery(&self, entry: &StreamId, redelivered: bool) -> Option<Delivery> {
        let payload: String = entry.get(PAYLOAD_FIELD)?;
        Some(Delivery {
            message_id: entry.id.clone(),
            queue: self.queue.clone(),
            payload,
            redelivered,
        })
    }

    async fn discard(&mut self, message_id: &str) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.queue)
            .arg(&self.group)
            .arg(message_id)
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(|e| QueueError::connection_lost(e.to_string()))
    }
}

#[async_trait]
impl DeliverySource for Consumer {
    async fn next_batch(&mut self, count: usize) -> QueueResult<Vec<Delivery>> {
        self.next(count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        task: String,
    }

    fn delivery(payload: &str) -> Delivery {
        Delivery {
            message_id: "1-0".to_string(),
            queue: "transcode_queue".to_string(),
            payload: payload.to_string(),
            redelivered: false,
        }
    }

    #[test]
    fn test_decode_payload() {
        let ping: Ping = delivery(r#"{"task":"process_directory"}"#).decode().unwrap();
        assert_eq!(ping.task, "process_directory");
    }

    #[test]
    fn test_decode_malformed_payload() {
        let err = delivery("not json").decode::<Ping>().unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
        assert!(err.to_string().contains("1-0"));
    }
}
