//! HTTP API for the video catalog.
//!
//! Exposes the catalog for reading and turns a few requests into queue
//! messages: directory scans, on-demand transcodes and retries of failed
//! entries. Transcoded files are served from the output root.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
