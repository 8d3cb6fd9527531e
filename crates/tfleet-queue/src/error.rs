//! Queue error types.

use thiserror::Error;

use tfleet_models::FailureClass;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker connection is down or unusable.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused or failed an operation on a healthy connection.
    #[error("Broker operation failed: {0}")]
    OperationFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }

    /// Whether the connection must be torn down and re-established.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
                    // The consumer group vanished (e.g. FLUSHALL); reconnecting recreates it.
                    || e.code() == Some("NOGROUP")
            }
            _ => false,
        }
    }

    pub fn class(&self) -> FailureClass {
        if self.is_connection_error() {
            FailureClass::Infrastructure
        } else {
            FailureClass::Temporary
        }
    }
}
