//! FFmpeg progress parsing.
//!
//! FFmpeg is run with `-progress pipe:2` and informational logging, so the
//! combined output contains both the input banner (`Duration: ...`) and
//! `key=value` progress blocks terminated by `progress=continue|end`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Margin within which a stream with decode errors still counts as complete.
const COMPLETE_STREAM_MARGIN_MS: i64 = 1000;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
    /// Duration of the first input, from the banner
    pub expected_duration_ms: Option<i64>,
    /// Number of inputs seen in the banner
    pub input_count: u32,
    /// Number of `Error while decoding stream` lines
    pub decode_errors: u32,
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*Duration: (\d+):(\d+):(\d+)\.(\d+)").expect("valid duration pattern")
    })
}

impl FfmpegProgress {
    /// Feed one output line.
    ///
    /// Returns `true` when the line closed a progress block, meaning the
    /// counters are consistent and worth reporting.
    pub fn feed(&mut self, line: &str) -> bool {
        let line = line.trim_end();

        if line.starts_with("Input #") {
            self.input_count += 1;
            return false;
        }
        if line.starts_with("Error while decoding stream") {
            self.decode_errors += 1;
            return false;
        }
        if self.expected_duration_ms.is_none() {
            if let Some(caps) = duration_pattern().captures(line) {
                let field = |i: usize| caps[i].parse::<i64>().unwrap_or(0);
                let fraction = &caps[4];
                let fraction_ms = format!("{:0<3}", &fraction[..fraction.len().min(3)])
                    .parse::<i64>()
                    .unwrap_or(0);
                self.expected_duration_ms = Some(
                    ((field(1) * 60 + field(2)) * 60 + field(3)) * 1000 + fraction_ms,
                );
                return false;
            }
        }

        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys are reported in microseconds by current FFmpeg.
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                self.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.fps = fps;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return true;
            }
            _ => {}
        }
        false
    }

    /// Completed fraction of the expected duration, in `0.0..=1.0`.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.expected_duration_ms.filter(|t| *t > 0)?;
        Some((self.out_time_ms.max(0) as f64 / total as f64).min(1.0))
    }

    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }

    /// Decide whether a run that reported decode errors still produced a
    /// usable output.
    ///
    /// A single input whose written duration is within one second of the
    /// expected duration is accepted.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.decode_errors == 0 {
            return Ok(());
        }
        match self.expected_duration_ms {
            Some(expected) if self.input_count == 1 && self.out_time_ms > 0 => {
                if self.out_time_ms >= expected - COMPLETE_STREAM_MARGIN_MS {
                    Ok(())
                } else {
                    Err("ffmpeg failed with incomplete stream".to_string())
                }
            }
            _ => Err("ffmpeg failed with errors".to_string()),
        }
    }
}
