//! Axum HTTP job submission endpoint.
//!
//! This crate provides:
//! - `POST /job` (and aliases) assigning a uid and publishing to the queue
//! - Queue depth at `/status` and liveness at `/health`
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
