//! Tracing setup and structured job logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` switches to JSON lines; anything else gets coloured
/// text. `RUST_LOG` adds to the default `vcat=info` directive.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive(
        "vcat=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the broker message id and the task kind, so one
/// message can be followed from delivery to resolution.
#[derive(Debug, Clone)]
pub struct JobLogger {
    message_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(message_id: &str, operation: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            message_id = %self.message_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            message_id = %self.message_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            message_id = %self.message_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            message_id = %self.message_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            message_id = %self.message_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span to instrument the job's future with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            message_id = %self.message_id,
            operation = %self.operation
        )
    }
}
