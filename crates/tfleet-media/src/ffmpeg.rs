//! FFmpeg command builder.
//!
//! Commands are rendered to a quoted shell command line and executed through
//! [`CommandRunner`], so they share output capture and cancellation with every
//! other external tool.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::command::{check_tool, CommandParams, CommandRunner};
use crate::error::{CommandError, CommandResult};
use crate::progress::FfmpegProgress;

const FFMPEG_BINARY: &str = "ffmpeg";

/// Per-version transcoding options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    /// Audio codec, `none` drops the audio stream
    pub audio_codec: Option<String>,
    pub audio_sample_rate: Option<u32>,
    pub audio_bitrate: Option<String>,
    /// Video codec, `none` drops the video stream
    pub video_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub video_frame_rate: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Container format passed to `-f`
    pub format: Option<String>,
    /// Quality in `0.0..=1.0`, mapped onto ffmpeg's `qscale`
    pub quality: Option<f64>,
}

/// Thumbnail extraction options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Absolute position of the frame
    pub at_seconds: Option<f64>,
    /// Position relative to the input duration, used when `at_seconds` is unset
    pub at_fraction: Option<f64>,
    /// Use both dimensions as given instead of deriving height from the aspect ratio
    pub force_aspect_ratio: bool,
}

impl ThumbnailOptions {
    /// Resolve the frame position for an input of `duration_secs`.
    pub fn position(&self, duration_secs: Option<f64>) -> f64 {
        self.at_seconds.unwrap_or_else(|| {
            duration_secs.unwrap_or(0.0).floor() * self.at_fraction.unwrap_or(0.5)
        })
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
    /// Encoder thread count
    threads: u32,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            // The input banner (durations, stream count) is only printed at info.
            log_level: "info".to_string(),
            threads: 1,
        }
    }

    /// Build a transcode of `input` into `output`.
    pub fn transcode(input: impl AsRef<Path>, output: impl AsRef<Path>, options: &TranscodeOptions) -> Self {
        let mut cmd = Self::new(input, output);

        match options.audio_codec.as_deref() {
            Some("none") => cmd = cmd.output_arg("-an"),
            codec => {
                if let Some(codec) = codec {
                    cmd = cmd.audio_codec(codec);
                }
                if let Some(rate) = options.audio_sample_rate {
                    cmd = cmd.output_arg("-ar").output_arg(rate.to_string());
                }
                if let Some(bitrate) = &options.audio_bitrate {
                    cmd = cmd.audio_bitrate(bitrate);
                }
            }
        }

        match options.video_codec.as_deref() {
            Some("none") => cmd = cmd.output_arg("-vn"),
            codec => {
                match codec {
                    Some("h264") => {
                        cmd = cmd.video_codec("libx264").preset("medium").crf(15);
                        cmd.threads = 0;
                    }
                    Some(codec) => cmd = cmd.video_codec(codec),
                    None => {}
                }
                if let Some(bitrate) = &options.video_bitrate {
                    cmd = cmd.output_arg("-b:v").output_arg(bitrate);
                }
                if let Some(rate) = options.video_frame_rate {
                    cmd = cmd.output_arg("-r").output_arg(rate.to_string());
                }
                if options.width.is_some() || options.height.is_some() {
                    cmd = cmd.video_filter(scale_filter(options.width, options.height));
                }
                let quality = options.quality.unwrap_or(1.0).clamp(0.0, 1.0);
                cmd = cmd
                    .output_arg("-q:v")
                    .output_arg(format!("{}", (1.0 + (1.0 - quality) * 30.0).round() as u32));
            }
        }

        if let Some(format) = &options.format {
            cmd = cmd.output_arg("-f").output_arg(format);
        }
        cmd
    }

    /// Build a single frame grab at `at_seconds`.
    pub fn thumbnail(
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &ThumbnailOptions,
        at_seconds: f64,
    ) -> Self {
        // Output paths may carry no extension to infer the muxer from
        let mut cmd = Self::new(input, output)
            .seek(at_seconds)
            .single_frame()
            .output_arg("-f")
            .output_arg("image2");
        if options.width.is_some() || options.height.is_some() {
            let filter = if options.force_aspect_ratio {
                scale_filter(options.width, options.height)
            } else {
                // Height follows the aspect ratio whenever a width is known.
                match options.width {
                    Some(width) => scale_filter(Some(width), None),
                    None => scale_filter(None, options.height),
                }
            };
            cmd = cmd.video_filter(filter);
        }
        cmd
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
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

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Set encoder threads. `0` lets ffmpeg decide.
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostats".to_string());

        // Progress blocks go to stdout, which the runner merges with stderr
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());

        args.push("-threads".to_string());
        args.push(self.threads.to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Render the shell command line.
    pub fn command_line(&self) -> String {
        let mut line = FFMPEG_BINARY.to_string();
        for arg in self.build_args() {
            line.push(' ');
            line.push_str(&shell_quote(&arg));
        }
        line
    }

    /// Run the command, reporting progress after every progress block.
    ///
    /// Returns the final progress state. A run that exits cleanly but logged
    /// decode errors is accepted only if the written stream is complete.
    pub async fn run<F>(
        &self,
        cancel_rx: Option<watch::Receiver<bool>>,
        mut on_progress: F,
    ) -> CommandResult<FfmpegProgress>
    where
        F: FnMut(&FfmpegProgress),
    {
        check_tool(FFMPEG_BINARY)?;

        let mut runner = CommandRunner::new(self.command_line());
        if let Some(rx) = cancel_rx {
            runner = runner.with_cancel(rx);
        }

        let mut progress = FfmpegProgress::default();
        runner
            .run_with_output(&CommandParams::new(), |line| {
                if progress.feed(line) {
                    on_progress(&progress);
                }
            })
            .await?;

        if let Err(message) = progress.check_integrity() {
            return Err(CommandError::execution_failed(
                message,
                format!("{} decode error(s)", progress.decode_errors),
            ));
        }
        if progress.decode_errors > 0 {
            warn!(
                decode_errors = progress.decode_errors,
                "ffmpeg exited with errors, but seems to have written a complete stream"
            );
        }
        info!(output = %self.output.display(), "ffmpeg finished");
        Ok(progress)
    }
}

fn scale_filter(width: Option<u32>, height: Option<u32>) -> String {
    let dim = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "-2".to_string());
    format!("scale={}:{}", dim(width), dim(height))
}

/// Single-quote an argument for `sh`.
pub(crate) fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
