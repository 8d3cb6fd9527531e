//! Error types for command execution.

use thiserror::Error;

use tfleet_models::FailureClass;

/// Result type for command execution.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors that can occur while running external tools.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Non-zero exit, death by signal, or a stopped process.
    #[error("{message}\n{output}")]
    ExecutionFailed { message: String, output: String },

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Command output could not be interpreted: {0}")]
    UnexpectedOutput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Create an execution failure error.
    pub fn execution_failed(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn unexpected_output(message: impl Into<String>) -> Self {
        Self::UnexpectedOutput(message.into())
    }

    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            CommandError::ExecutionFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled)
    }

    /// Execution failures are retryable; a missing tool or an input the tool
    /// cannot decode will fail the same way every time.
    pub fn class(&self) -> FailureClass {
        match self {
            CommandError::ToolNotFound(_) | CommandError::UnsupportedFormat(_) => {
                FailureClass::Permanent
            }
            _ => FailureClass::Temporary,
        }
    }
}
