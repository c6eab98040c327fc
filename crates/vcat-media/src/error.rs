//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors from scanning and probing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFprobe not found: {0}")]
    FfprobeNotFound(String),

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Scan of {root} failed: {message}")]
    ScanFailed { root: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a scan failure error.
    pub fn scan_failed(root: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ScanFailed {
            root: root.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Job-scoped failures of a single transcode.
///
/// None of these are retried: the job is reported as failed and its message is
/// resolved permanently.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The encoder could not be started (missing binary, permissions).
    #[error("Failed to spawn encoder {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder exited with a non-zero code (`None` when killed by a signal).
    #[error("Encoder exited with code {}", code.map(|c| c.to_string()).unwrap_or_else(|| "none (signal)".to_string()))]
    EncoderFailed { code: Option<i32> },

    /// The encoder reported success but the output is missing or empty.
    #[error("Encoder produced an empty output file: {}", path.display())]
    EmptyOutput { path: PathBuf },

    /// The encoder outlived its deadline and was killed.
    #[error("Encoder exceeded its {secs}s deadline and was killed")]
    TimeoutExceeded { secs: u64 },

    /// The output directory could not be created.
    #[error("Failed to create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source file is not under the configured source root.
    #[error("Source {} is outside the source root {}", path.display(), root.display())]
    OutsideSourceRoot { path: PathBuf, root: PathBuf },

    /// Waiting on the encoder process failed.
    #[error("Encoder process error: {0}")]
    Process(#[source] std::io::Error),

    /// The transcode task died before producing a result.
    #[error("Transcode aborted: {0}")]
    Aborted(String),
}

impl TranscodeError {
    /// Short machine-readable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeError::SpawnFailed { .. } => "spawn_failed",
            TranscodeError::EncoderFailed { .. } => "encoder_failed",
            TranscodeError::EmptyOutput { .. } => "empty_output",
            TranscodeError::TimeoutExceeded { .. } => "timeout_exceeded",
            TranscodeError::OutputDirectory { .. } => "output_directory",
            TranscodeError::OutsideSourceRoot { .. } => "outside_source_root",
            TranscodeError::Process(_) => "process",
            TranscodeError::Aborted(_) => "aborted",
        }
    }

    /// Whether the failure points at a deployment problem rather than the file.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TranscodeError::SpawnFailed { .. } | TranscodeError::OutsideSourceRoot { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_error_messages() {
        assert_eq!(
            TranscodeError::EncoderFailed { code: Some(1) }.to_string(),
            "Encoder exited with code 1"
        );
        assert_eq!(
            TranscodeError::EncoderFailed { code: None }.to_string(),
            "Encoder exited with code none (signal)"
        );
        assert_eq!(
            TranscodeError::TimeoutExceeded { secs: 45 }.kind(),
            "timeout_exceeded"
        );
    }

    #[test]
    fn test_configuration_errors() {
        let spawn = TranscodeError::SpawnFailed {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(spawn.is_configuration_error());
        assert!(!TranscodeError::EmptyOutput { path: PathBuf::from("/out/a.mp4") }.is_configuration_error());
    }
}
