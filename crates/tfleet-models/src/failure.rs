//! Failure classification.

use serde::{Deserialize, Serialize};

/// How a failure should be treated by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Bad input, missing resource, unsupported source. Never retried.
    Permanent,
    /// Network or availability issue. Retried against the job's budget.
    Temporary,
    /// Broker connectivity. Retried indefinitely, invisible to jobs.
    Infrastructure,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Permanent => "permanent",
            FailureClass::Temporary => "temporary",
            FailureClass::Infrastructure => "infrastructure",
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureClass::Permanent)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
