//! Job validation errors.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

/// Reasons a job specification is rejected.
///
/// All variants are permanent: resubmitting the same job can never succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job has no uid")]
    MissingUid,

    #[error("Job has no type")]
    MissingType,

    #[error("Unknown job type: {0}")]
    UnknownType(String),

    #[error("Invalid job: {0}")]
    Invalid(String),
}

impl JobError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
