//! Transcoding engine: one source file in, one verified web-friendly file out.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::TranscodeError;
use crate::probe::probe_media;

/// Transcoding settings.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Root of the scanned source tree
    pub source_root: PathBuf,
    /// Root of the mirrored output tree
    pub output_root: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Deadline multiplier applied to the probed duration
    pub timeout_factor: f64,
    /// Lower bound for any deadline
    pub min_timeout: Duration,
    /// Deadline used when the duration cannot be probed
    pub fallback_timeout: Duration,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("/videos"),
            output_root: PathBuf::from("/transcoded"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            timeout_factor: 1.5,
            min_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(7200),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
        }
    }
}

impl TranscodeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            source_root: std::env::var("VIDEO_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_root),
            output_root: std::env::var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            timeout_factor: std::env::var("TRANSCODE_TIMEOUT_FACTOR")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|f| f.is_finite() && *f > 0.0)
                .unwrap_or(defaults.timeout_factor),
            min_timeout: std::env::var("TRANSCODE_MIN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_timeout),
            fallback_timeout: std::env::var("TRANSCODE_FALLBACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fallback_timeout),
            video_codec: std::env::var("TRANSCODE_VIDEO_CODEC").unwrap_or(defaults.video_codec),
            audio_codec: std::env::var("TRANSCODE_AUDIO_CODEC").unwrap_or(defaults.audio_codec),
            preset: std::env::var("TRANSCODE_PRESET").unwrap_or(defaults.preset),
            crf: std::env::var("TRANSCODE_CRF")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.crf),
        }
    }

    /// Map a source file to its place in the output tree.
    ///
    /// The path relative to the source root is kept verbatim, extension
    /// included, under the output root.
    pub fn output_path_for(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        let root = absolute(&self.source_root);
        let source_abs = absolute(source);

        let outside = || TranscodeError::OutsideSourceRoot {
            path: source.to_path_buf(),
            root: self.source_root.clone(),
        };

        let relative = source_abs.strip_prefix(&root).map_err(|_| outside())?;
        if relative.as_os_str().is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(outside());
        }

        Ok(absolute(&self.output_root).join(relative))
    }

    /// Deadline for a source of the given duration (`None` when unknown).
    pub fn compute_timeout(&self, duration_secs: Option<f64>) -> Duration {
        match duration_secs {
            Some(d) if d.is_finite() && d > 0.0 => {
                match Duration::try_from_secs_f64(d * self.timeout_factor) {
                    Ok(scaled) => scaled.max(self.min_timeout),
                    // Durations too large to represent are treated as unknown
                    Err(_) => self.fallback_timeout.max(self.min_timeout),
                }
            }
            _ => self.fallback_timeout.max(self.min_timeout),
        }
    }

    fn build_command(&self, source: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(source, output)
            .program(&self.ffmpeg_path)
            .video_codec(&self.video_codec)
            .preset(&self.preset)
            .crf(self.crf)
            .pixel_format("yuv420p")
            .audio_codec(&self.audio_codec)
            .faststart()
            .format("mp4")
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Turns one source file into one encoded output file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `source` and return the path of the verified output.
    async fn transcode(&self, source: &Path) -> Result<PathBuf, TranscodeError>;
}

/// [`Transcoder`] backed by the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    async fn deadline_for(&self, source: &Path) -> Duration {
        match probe_media(&self.config.ffprobe_path, source).await {
            Ok(info) => {
                let timeout = self.config.compute_timeout(Some(info.duration));
                debug!(
                    source = %source.display(),
                    duration = info.duration,
                    size = info.size,
                    bitrate = info.bitrate,
                    video_codec = info.video_codec.as_deref().unwrap_or("none"),
                    timeout_secs = timeout.as_secs_f64(),
                    "Probed source"
                );
                timeout
            }
            Err(e) => {
                let timeout = self.config.compute_timeout(None);
                warn!(
                    source = %source.display(),
                    error = %e,
                    timeout_secs = timeout.as_secs(),
                    "Duration probe failed, using fallback deadline"
                );
                timeout
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        let output = self.config.output_path_for(source)?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TranscodeError::OutputDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let timeout = self.deadline_for(source).await;
        let cmd = self.config.build_command(source, &output);

        info!(
            source = %source.display(),
            output = %output.display(),
            timeout_secs = timeout.as_secs(),
            "Starting transcode"
        );

        let result = match FfmpegRunner::new().with_timeout(timeout).run(&cmd).await {
            Ok(()) => verify_output(&output).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(output = %output.display(), "Transcode complete");
                Ok(output)
            }
            Err(e) => {
                remove_partial(&output).await;
                Err(e)
            }
        }
    }
}

/// A zero exit code is not enough: the output must exist and be non-empty.
async fn verify_output(output: &Path) -> Result<(), TranscodeError> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(TranscodeError::EmptyOutput {
            path: output.to_path_buf(),
        }),
    }
}

async fn remove_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(output = %output.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(output = %output.display(), error = %e, "Failed to remove partial output"),
    }
}
