//! Structured job logging.
//!
//! Every line logged for a job carries the worker that runs it and the job
//! uid, so interleaved output from several workers can be told apart.

use tracing::{error, info, warn, Span};

use tfleet_models::Job;

/// Per-job log context.
#[derive(Debug, Clone)]
pub struct JobLogger {
    worker: String,
    job_uid: String,
    job_type: String,
}

impl JobLogger {
    pub fn new(worker: &str, job: &Job) -> Self {
        Self {
            worker: worker.to_string(),
            job_uid: job.uid().to_string(),
            job_type: job.job_type().to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            worker = %self.worker,
            job_uid = %self.job_uid,
            job_type = %self.job_type,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, fraction: f64) {
        info!(
            worker = %self.worker,
            job_uid = %self.job_uid,
            "Job progress: {:.1}%", fraction * 100.0
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            worker = %self.worker,
            job_uid = %self.job_uid,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            worker = %self.worker,
            job_uid = %self.job_uid,
            job_type = %self.job_type,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            worker = %self.worker,
            job_uid = %self.job_uid,
            job_type = %self.job_type,
            "Job completed in {:.3} secs", elapsed_secs
        );
    }

    pub fn job_uid(&self) -> &str {
        &self.job_uid
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Span wrapping everything done for the job.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            worker = %self.worker,
            job_uid = %self.job_uid,
            job_type = %self.job_type
        )
    }
}
