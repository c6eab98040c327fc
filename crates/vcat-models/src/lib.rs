//! Shared data models for the vcat catalog pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Catalog entries and their status state machine
//! - File descriptors produced by the directory scanner
//! - Message envelopes exchanged over the transcode and catalog queues

pub mod catalog;
pub mod task;

// Re-export common types
pub use catalog::{
    CatalogEntry, CatalogId, CatalogStatus, FileDescriptor, NewCatalogEntry, ParseStatusError,
};
pub use task::{
    CatalogReset, CatalogTask, CatalogUpdate, TranscodeRequest, TranscodeTask, DB_QUEUE,
    TRANSCODE_QUEUE,
};
