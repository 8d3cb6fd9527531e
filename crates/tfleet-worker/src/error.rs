//! Worker error types.

use thiserror::Error;

use tfleet_media::CommandError;
use tfleet_models::{FailureClass, JobError};
use tfleet_queue::QueueError;
use tfleet_storage::ResourceError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobError),

    #[error("No processor registered for job type: {0}")]
    UnknownProcessor(String),

    #[error("Invalid processor parameters: {0}")]
    InvalidParams(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Failure class deciding whether the job is retried.
    pub fn class(&self) -> FailureClass {
        match self {
            WorkerError::InvalidJob(_)
            | WorkerError::UnknownProcessor(_)
            | WorkerError::InvalidParams(_) => FailureClass::Permanent,
            WorkerError::Resource(e) => e.class(),
            WorkerError::Command(e) => e.class(),
            WorkerError::Queue(e) => e.class(),
            WorkerError::ProcessingFailed(_) | WorkerError::Cancelled => FailureClass::Temporary,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Command(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the failure came from a transport timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            WorkerError::Resource(ResourceError::Timeout(_)) => true,
            WorkerError::Queue(e) => matches!(e, QueueError::Redis(r) if r.is_timeout()),
            _ => false,
        }
    }

    /// Human-readable reason sent with failure notifications.
    ///
    /// Captured command output is left out; it is logged instead.
    pub fn reason(&self) -> String {
        match self {
            WorkerError::Command(CommandError::ExecutionFailed { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(
            WorkerError::from(JobError::MissingType).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            WorkerError::from(ResourceError::not_found("file:///nope")).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            WorkerError::from(ResourceError::temporarily_unavailable("503")).class(),
            FailureClass::Temporary
        );
        assert_eq!(
            WorkerError::from(CommandError::execution_failed("exit 1", "")).class(),
            FailureClass::Temporary
        );
        assert_eq!(
            WorkerError::from(CommandError::UnsupportedFormat("x.bin".into())).class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_cancellation_is_detected_through_commands() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::from(CommandError::Cancelled).is_cancelled());
        assert!(!WorkerError::processing_failed("boom").is_cancelled());
    }

    #[test]
    fn test_timeouts_are_detected_structurally() {
        assert!(WorkerError::from(ResourceError::timeout("Timeout fetching http://example.com/a.mp4")).is_timeout());
        assert!(!WorkerError::from(ResourceError::temporarily_unavailable("timed out")).is_timeout());
        assert!(!WorkerError::processing_failed("timed out").is_timeout());
    }

    #[test]
    fn test_reason_omits_command_output() {
        let err = WorkerError::from(CommandError::execution_failed(
            "Command failed with exit code 1: ffmpeg",
            "very long output",
        ));
        assert_eq!(err.reason(), "Command failed with exit code 1: ffmpeg");
    }
}
