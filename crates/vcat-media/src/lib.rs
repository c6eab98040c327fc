//! Directory scanning and FFmpeg transcoding.
//!
//! This crate provides:
//! - Recursive discovery of video files with filesystem metadata
//! - Duration probing via FFprobe
//! - A type-safe FFmpeg command builder and a runner with a hard deadline
//! - The transcoding engine: output path mapping, encoding and verification

pub mod command;
pub mod error;
pub mod probe;
pub mod scanner;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult, TranscodeError};
pub use probe::{probe_media, MediaInfo};
pub use scanner::{is_video_file, scan_directory, VIDEO_EXTENSIONS};
pub use transcode::{FfmpegTranscoder, TranscodeConfig, Transcoder};
