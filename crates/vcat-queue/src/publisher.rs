//! Publishing seam shared by the broker and in-process tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::error::{QueueError, QueueResult};

/// Something that can append a JSON payload to a named queue.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish_payload(&self, queue: &str, payload: String) -> QueueResult<()>;
}

/// Typed publishing helpers for every [`MessagePublisher`].
#[async_trait]
pub trait PublishExt: MessagePublisher {
    /// Serialize and publish a message.
    async fn publish_message<T: Serialize + Sync>(&self, queue: &str, message: &T) -> QueueResult<()> {
        let payload = serde_json::to_string(message)?;
        self.publish_payload(queue, payload).await
    }

    /// Fire-and-forget publish: failures are logged, never returned.
    ///
    /// Returns whether the message was handed to the broker.
    async fn publish_or_log<T: Serialize + Sync>(&self, queue: &str, message: &T) -> bool {
        match self.publish_message(queue, message).await {
            Ok(()) => true,
            Err(e) => {
                error!(queue, error = %e, "Failed to publish message");
                false
            }
        }
    }
}

impl<P: MessagePublisher + ?Sized> PublishExt for P {}

/// In-process publisher that records every message per queue.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Mutex<HashMap<String, Vec<String>>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (simulated broker outage).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Raw payloads published to `queue`, in order.
    pub fn payloads(&self, queue: &str) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.get(queue).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Payloads published to `queue`, decoded.
    pub fn decoded<T: DeserializeOwned>(&self, queue: &str) -> Vec<T> {
        self.payloads(queue)
            .iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for MemoryPublisher {
    async fn publish_payload(&self, queue: &str, payload: String) -> QueueResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::publish_failed("broker unavailable"));
        }
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| QueueError::publish_failed("publisher lock poisoned"))?;
        messages.entry(queue.to_string()).or_default().push(payload);
        Ok(())
    }
}
