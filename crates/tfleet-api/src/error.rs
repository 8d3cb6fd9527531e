//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid job specification")]
    InvalidJob(String),

    #[error("Not found")]
    NotFound,

    #[error("Queue error: {0}")]
    Queue(#[from] tfleet_queue::QueueError),
}

impl ApiError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidJob(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Bodies are plain text; submitters read the uid or the message verbatim.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Queue(e) => {
                error!(error = %e, "Failed to publish job");
                "Internal error".to_string()
            }
            _ => self.to_string(),
        };
        (status, body).into_response()
    }
}
