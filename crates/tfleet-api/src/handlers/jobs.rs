//! Job submission.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use tfleet_models::{Job, JobUid, Params, QueueMessage};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Submitted job specification. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub notification_url: Option<String>,
    #[serde(default)]
    pub reference: Option<Value>,
    #[serde(default)]
    pub retries: Option<u32>,
    /// Uid namespace
    #[serde(default)]
    pub path: Option<String>,
}

/// Accept a job, assign its uid and publish it.
///
/// Responds `201` with the uid as the body.
pub async fn submit_job(State(state): State<AppState>, body: Bytes) -> ApiResult<(StatusCode, String)> {
    let spec: JobSpec = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Unparsable job specification");
        ApiError::invalid_job(e.to_string())
    })?;

    let path = resolve_path(&state.config, spec.path.as_deref());
    let uid = JobUid::generate(&state.namespace, path);

    let mut job = Job::new(uid.clone(), spec.job_type, spec.params)
        .with_notification_url(spec.notification_url)
        .with_reference(spec.reference);
    if let Some(retries) = spec.retries {
        job = job.with_retries(retries);
    }

    let job_type = job.validate().map_err(|e| {
        warn!(error = %e, "Rejected job specification");
        ApiError::invalid_job(e.to_string())
    })?;

    state
        .queue
        .publish(&QueueMessage::new(job, &state.namespace))
        .await?;

    metrics::record_job_submitted(job_type.as_str());
    info!(job_uid = %uid, job_type = job_type.as_str(), "Job submitted");
    Ok((StatusCode::CREATED, uid.to_string()))
}

/// Fallback for unknown routes and methods.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn resolve_path<'a>(config: &'a ApiConfig, requested: Option<&'a str>) -> &'a str {
    match requested {
        Some(path) if config.is_registered_path(path) => path,
        Some(path) => {
            warn!(path, default = %config.default_path, "Unregistered path, using default");
            &config.default_path
        }
        None => &config.default_path,
    }
}
