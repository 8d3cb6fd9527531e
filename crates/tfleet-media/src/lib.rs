//! External command execution for media processing.
//!
//! This crate provides:
//! - A command runner with `:name` parameter substitution, streamed
//!   line-by-line output, bounded output capture and cancellation
//! - FFmpeg command building and output progress parsing
//! - ImageMagick `identify`/`convert` command building

pub mod command;
pub mod error;
pub mod ffmpeg;
pub mod imagemagick;
pub mod progress;

pub use command::{check_tool, CommandParams, CommandRunner, OUTPUT_BUFFER_LIMIT};
pub use error::{CommandError, CommandResult};
pub use ffmpeg::{FfmpegCommand, ThumbnailOptions, TranscodeOptions};
pub use imagemagick::{target_dimensions, ConvertCommand, IdentifyCommand, ImageInfo};
pub use progress::FfmpegProgress;
