//! Queue message wire format.

use serde::{Deserialize, Serialize};

use crate::job::{Job, Params};

/// JSON body of a queued job.
///
/// Carries the job attributes plus an `event` discriminator of
/// `"<namespace>.job"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(flatten)]
    pub job: Job,
    pub event: String,
}

impl QueueMessage {
    /// Wrap a job for publishing under `namespace`.
    pub fn new(job: Job, namespace: &str) -> Self {
        Self {
            job,
            event: Self::event_name(namespace),
        }
    }

    /// Event discriminator used for job messages.
    pub fn event_name(namespace: &str) -> String {
        format!("{}.job", namespace)
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    pub fn params(&self) -> &Params {
        self.job.params()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}
