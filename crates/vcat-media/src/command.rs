//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult, TranscodeError};

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Encoder binary
    program: String,
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Use a specific encoder binary.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Normalize the pixel format.
    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Encoder binary this command runs.
    pub fn program_name(&self) -> &str {
        &self.program
    }

    /// Output file path.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        // Overwrite, errors only, never wait on stdin
        let mut args: Vec<String> = ["-y", "-v", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with a hard deadline.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Wall-clock deadline for the process
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command to completion.
    ///
    /// Standard error is logged line by line. A process still running at the
    /// deadline is killed. Success here only means exit code zero; callers
    /// verify the output themselves.
    pub async fn run(&self, cmd: &FfmpegCommand) -> Result<(), TranscodeError> {
        let args = cmd.build_args();
        debug!("Running encoder: {} {}", cmd.program_name(), args.join(" "));

        let mut child = Command::new(cmd.program_name())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::SpawnFailed {
                program: cmd.program_name().to_string(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let output = cmd.output_path().display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(output = %output, "ffmpeg: {}", line);
                }
            })
        });

        let waited = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    let secs = timeout.as_secs_f64().ceil() as u64;
                    warn!("Encoder timed out after {:?}, killing process", timeout);
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill encoder process");
                    }
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    return Err(TranscodeError::TimeoutExceeded { secs });
                }
            },
            None => child.wait().await,
        };

        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let status = waited.map_err(TranscodeError::Process)?;
        if status.success() {
            Ok(())
        } else {
            Err(TranscodeError::EncoderFailed { code: status.code() })
        }
    }
}

/// Check if the encoder binary is available.
pub fn check_ffmpeg(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::FfmpegNotFound(program.to_string()))
}

/// Check if the probe binary is available.
pub fn check_ffprobe(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::FfprobeNotFound(program.to_string()))
}
