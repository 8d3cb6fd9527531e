//! Lifecycle notification payloads.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobUid, Params};

/// Job lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    Started,
    Progress,
    Completed,
    Canceled,
    FailedWillRetry,
    Failed,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Started => "started",
            JobEvent::Progress => "progress",
            JobEvent::Completed => "completed",
            JobEvent::Canceled => "canceled",
            JobEvent::FailedWillRetry => "failed_will_retry",
            JobEvent::Failed => "failed",
        }
    }

    /// Fully qualified event name, e.g. `tfleet.completed`.
    pub fn qualified(&self, namespace: &str) -> String {
        format!("{}.{}", namespace, self.as_str())
    }
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification body sent to webhooks and the pub/sub bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub uid: JobUid,
    pub event: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<serde_json::Value>,
    /// Event specific data (`reason`, `time_taken`, `progress`, processor results).
    #[serde(flatten)]
    pub data: Params,
}

impl Notification {
    /// Build the notification for `event` on `job`.
    ///
    /// Keys in `data` that collide with the envelope fields are dropped so the
    /// envelope always identifies the job.
    pub fn for_job(job: &Job, namespace: &str, event: JobEvent, data: Params) -> Self {
        Self::with_event_name(job, event.qualified(namespace), data)
    }

    /// Same as [`Notification::for_job`] with an explicit event name.
    pub fn with_event_name(job: &Job, event: String, mut data: Params) -> Self {
        for key in ["uid", "event", "type", "params", "reference"] {
            data.remove(key);
        }
        Self {
            uid: job.uid().clone(),
            event,
            job_type: job.job_type().to_string(),
            params: job.params().clone(),
            reference: job.reference().cloned(),
            data,
        }
    }
}
