//! Application state.

use std::sync::Arc;

use tfleet_queue::JobPublisher;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn JobPublisher>,
    /// Namespace for uids and queue message events
    pub namespace: String,
}

impl AppState {
    pub fn new(config: ApiConfig, queue: Arc<dyn JobPublisher>, namespace: impl Into<String>) -> Self {
        Self {
            config,
            queue,
            namespace: namespace.into(),
        }
    }
}
