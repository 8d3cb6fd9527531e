//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of independent worker tasks
    pub worker_count: usize,
    /// Minimum wall time between two progress notifications for a job
    pub progress_interval: Duration,
    /// FFmpeg encoder threads, `None` leaves the choice to the command builder
    pub ffmpeg_threads: Option<u32>,
    /// Republish `completed` on the bus under the legacy `<ns>_completed` name
    pub legacy_completion_event: bool,
    /// Work directory for temporary files
    pub work_dir: String,
    /// Port for the Prometheus scrape endpoint, disabled when unset
    pub metrics_port: Option<u16>,
    /// Pause before a worker restarts its consume loop after an error
    pub restart_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            progress_interval: Duration::from_secs(30),
            ffmpeg_threads: None,
            legacy_completion_event: true,
            work_dir: "/tmp/tfleet".to_string(),
            metrics_port: None,
            restart_delay: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            progress_interval: std::env::var("WORKER_PROGRESS_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.progress_interval),
            ffmpeg_threads: std::env::var("WORKER_FFMPEG_THREADS")
                .ok()
                .and_then(|s| s.parse().ok()),
            legacy_completion_event: std::env::var("USE_LEGACY_COMPLETION_EVENT")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.legacy_completion_event),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            restart_delay: defaults.restart_delay,
        }
    }
}
