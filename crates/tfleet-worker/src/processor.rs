//! Processor interface and registry.
//!
//! A processor performs the media work for one job type. The worker looks
//! processors up by job type in a [`ProcessorRegistry`] built at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};

use tfleet_models::{JobType, Params};
use tfleet_storage::StorageContext;

use crate::error::{WorkerError, WorkerResult};

/// Sends progress reports from a processor to the worker.
///
/// Reports never block; the worker decides which ones become notifications.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<f64>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<f64>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that drops every report.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Report completion as a fraction in `0.0..=1.0`.
    pub fn report(&self, fraction: f64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(fraction.clamp(0.0, 1.0));
        }
    }
}

/// Everything a processor gets besides its parameters.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    storage: StorageContext,
    progress: ProgressReporter,
    cancel: watch::Receiver<bool>,
    ffmpeg_threads: Option<u32>,
}

impl ProcessorContext {
    pub fn new(storage: StorageContext, progress: ProgressReporter, cancel: watch::Receiver<bool>) -> Self {
        Self {
            storage,
            progress,
            cancel,
            ffmpeg_threads: None,
        }
    }

    pub fn with_ffmpeg_threads(mut self, threads: Option<u32>) -> Self {
        self.ffmpeg_threads = threads;
        self
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Cancellation flag to hand to external commands.
    pub fn cancel(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    pub fn ffmpeg_threads(&self) -> Option<u32> {
        self.ffmpeg_threads
    }
}

/// Pluggable unit of media work.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run the job. The returned map is merged into the `completed`
    /// notification.
    async fn execute(&self, params: &Params, ctx: &ProcessorContext) -> WorkerResult<Params>;
}

/// Static mapping from job type to processor.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in processors. Audio jobs run through the
    /// video processor.
    pub fn with_defaults() -> Self {
        let video: Arc<dyn Processor> = Arc::new(crate::processors::VideoProcessor);
        let mut registry = Self::new();
        registry.register(JobType::Video, Arc::clone(&video));
        registry.register(JobType::Audio, video);
        registry.register(JobType::Image, Arc::new(crate::processors::ImageProcessor));
        registry
    }

    pub fn register(&mut self, job_type: JobType, processor: Arc<dyn Processor>) {
        self.processors.insert(job_type, processor);
    }

    /// Look up the processor for `job_type`.
    pub fn get(&self, job_type: JobType) -> WorkerResult<Arc<dyn Processor>> {
        self.processors
            .get(&job_type)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownProcessor(job_type.to_string()))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.processors.keys().map(JobType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ProcessorRegistry").field("types", &types).finish()
    }
}

/// Deserialize processor parameters into a typed struct.
pub fn parse_params<T: DeserializeOwned>(params: &Params) -> WorkerResult<T> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| WorkerError::invalid_params(e.to_string()))
}
