//! Resource error types.

use thiserror::Error;

use tfleet_models::FailureClass;

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors raised by resource handles.
///
/// Every variant is either permanent (the same request will fail again) or
/// temporary (worth retrying later), see [`ResourceError::class`].
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Not a valid resource URL: {0}")]
    InvalidUri(String),

    #[error("Unsupported resource: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid mode: {0:?}")]
    InvalidMode(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),

    #[error("Resource unavailable: {0}")]
    Unavailable(String),

    #[error("Resource is empty: {0}")]
    Empty(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Resource temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResourceError {
    pub fn invalid_uri(msg: impl Into<String>) -> Self {
        Self::InvalidUri(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn temporarily_unavailable(msg: impl Into<String>) -> Self {
        Self::TemporarilyUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ResourceError::TemporarilyUnavailable(_)
            | ResourceError::Timeout(_)
            | ResourceError::UnexpectedResponse(_)
            | ResourceError::Io(_) => FailureClass::Temporary,
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class().is_permanent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ResourceError::not_found("x").is_permanent());
        assert!(ResourceError::Empty("x".into()).is_permanent());
        assert!(ResourceError::Unavailable("x".into()).is_permanent());
        assert!(ResourceError::TooManyRedirects("x".into()).is_permanent());
        assert!(ResourceError::UnsupportedScheme("ftp".into()).is_permanent());
        assert_eq!(
            ResourceError::temporarily_unavailable("x").class(),
            FailureClass::Temporary
        );
        assert_eq!(ResourceError::timeout("x").class(), FailureClass::Temporary);
        assert_eq!(
            ResourceError::unexpected_response("x").class(),
            FailureClass::Temporary
        );
    }
}
