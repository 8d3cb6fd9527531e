//! Job definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

/// Retry budget given to jobs that do not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Namespace used for uids, queue message events and notification events.
pub const DEFAULT_NAMESPACE: &str = "tfleet";

/// Opaque processor parameters, forwarded verbatim.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Globally unique job identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobUid(pub String);

impl JobUid {
    /// Generate a uid namespaced under `path`.
    ///
    /// Format: `<namespace>.job:<path>$<YYYYmmddHHMMSS><base36 random>`.
    pub fn generate(namespace: &str, path: &str) -> Self {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let suffix = to_base36(rand::random::<u64>());
        Self(format!("{}.job:{}${}{}", namespace, path, stamp, suffix))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The path segment between `:` and `$`, if the uid was generated by
    /// [`JobUid::generate`].
    pub fn path(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once(':')?;
        let (path, _) = rest.split_once('$')?;
        Some(path)
    }
}

impl fmt::Display for JobUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// The allow-list of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Video,
    Audio,
    Image,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Video, JobType::Audio, JobType::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Video => "video",
            JobType::Audio => "audio",
            JobType::Image => "image",
        }
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of transcoding work.
///
/// Identity (`uid`, `type`, `params`, `notification_url`, `reference`) is
/// fixed at creation. The retry budget is the only mutable part and is
/// changed by the worker through [`Job::consume_retry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    uid: JobUid,
    #[serde(rename = "type", default)]
    job_type: String,
    #[serde(default)]
    params: Params,
    #[serde(rename = "retries", default = "default_retries")]
    retries_left: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<serde_json::Value>,
    #[serde(skip, default = "Utc::now")]
    created_at: DateTime<Utc>,
}

fn default_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Job {
    /// Create a new job with the default retry budget.
    pub fn new(uid: JobUid, job_type: impl Into<String>, params: Params) -> Self {
        Self {
            uid,
            job_type: job_type.into(),
            params,
            retries_left: DEFAULT_MAX_RETRIES,
            notification_url: None,
            reference: None,
            created_at: Utc::now(),
        }
    }

    /// Set the webhook target.
    pub fn with_notification_url(mut self, url: Option<String>) -> Self {
        self.notification_url = url;
        self
    }

    /// Set the passthrough reference.
    pub fn with_reference(mut self, reference: Option<serde_json::Value>) -> Self {
        self.reference = reference;
        self
    }

    /// Set the retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_left = retries;
        self
    }

    /// Check the job is acceptable and resolve its type.
    pub fn validate(&self) -> JobResult<JobType> {
        if self.uid.is_empty() {
            return Err(JobError::MissingUid);
        }
        if self.job_type.is_empty() {
            return Err(JobError::MissingType);
        }
        self.job_type.parse()
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Spend one retry. Returns `false` when the budget is already exhausted.
    pub fn consume_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    pub fn uid(&self) -> &JobUid {
        &self.uid
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn notification_url(&self) -> Option<&str> {
        self.notification_url.as_deref()
    }

    pub fn reference(&self) -> Option<&serde_json::Value> {
        self.reference.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
            && self.job_type == other.job_type
            && self.params == other.params
            && self.retries_left == other.retries_left
            && self.notification_url == other.notification_url
            && self.reference == other.reference
    }
}
