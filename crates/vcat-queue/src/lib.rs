//! Durable message broker client over Redis Streams.
//!
//! This crate provides:
//! - Connection with bounded, fixed-interval retries
//! - Idempotent queue (stream + consumer group) declaration
//! - Fire-and-forget publishing behind the `MessagePublisher` seam
//! - Consumption with explicit ack / nack (requeue or dead-letter)

pub mod consumer;
pub mod error;
pub mod publisher;
pub mod queue;

pub use consumer::{Consumer, Delivery, DeliverySource, Disposition, Settler};
pub use error::{QueueError, QueueResult};
pub use publisher::{MemoryPublisher, MessagePublisher, PublishExt};
pub use queue::{dead_letter_queue, Broker, QueueConfig};
