//! Retry decision for failed jobs.

use crate::error::WorkerError;

/// What happens to a job after its processor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Spend one retry, notify `failed_will_retry` and republish.
    Retry,
    /// Notify `failed`. Terminal.
    Fail,
    /// Notify `canceled`. Terminal, never retried.
    Cancel,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Retry => "retry",
            Disposition::Fail => "fail",
            Disposition::Cancel => "cancel",
        }
    }
}

/// Decide the next state of a job that failed with `error` while holding
/// `retries_left` retries.
pub fn classify(error: &WorkerError, retries_left: u32) -> Disposition {
    if error.is_cancelled() {
        Disposition::Cancel
    } else if retries_left > 0 && !error.class().is_permanent() {
        Disposition::Retry
    } else {
        Disposition::Fail
    }
}
