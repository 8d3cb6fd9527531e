//! Transcoding worker.
//!
//! This crate provides:
//! - Processors for video, audio and image jobs behind a type registry
//! - The per-job lifecycle: validation, progress throttling, retry
//!   classification and cancellation
//! - Lifecycle notifications over webhooks or the event bus
//! - A supervisor that runs and restarts a pool of workers

pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod processor;
pub mod processors;
pub mod retry;
pub mod supervisor;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use notifier::Notifier;
pub use processor::{Processor, ProcessorContext, ProcessorRegistry, ProgressReporter};
pub use retry::{classify, Disposition};
pub use supervisor::{shutdown_signal, Supervisor};
pub use worker::{Outcome, Worker};

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use tfleet_storage::{StorageConfig, StorageContext};

    /// Driver context that never reaches real object storage.
    pub async fn storage_context() -> StorageContext {
        let config = StorageConfig {
            endpoint_url: Some("http://127.0.0.1:9".to_string()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            http_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        StorageContext::from_config(&config)
            .await
            .expect("storage context")
    }
}
