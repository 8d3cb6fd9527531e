//! Shared state for resource drivers.

use std::path::{Path, PathBuf};

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{ResourceError, ResourceResult};

/// Clients and settings handed to every resource handle.
///
/// Cheap to clone: both clients are reference counted internally.
#[derive(Clone, Debug)]
pub struct StorageContext {
    http: reqwest::Client,
    s3: S3Client,
    public_base_url: Option<String>,
    temp_dir: Option<PathBuf>,
}

impl StorageContext {
    /// Build the driver clients from configuration.
    pub async fn from_config(config: &StorageConfig) -> ResourceResult<Self> {
        let http = build_http_client(config)?;

        let s3 = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret, None, None, "tfleet");
                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials);
                if let Some(endpoint) = &config.endpoint_url {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                S3Client::from_conf(builder.build())
            }
            _ => {
                debug!("No static S3 credentials, using default provider chain");
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()));
                if let Some(endpoint) = &config.endpoint_url {
                    loader = loader.endpoint_url(endpoint);
                }
                let sdk_config = loader.load().await;
                let builder = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .force_path_style(config.endpoint_url.is_some());
                S3Client::from_conf(builder.build())
            }
        };

        Ok(Self {
            http,
            s3,
            public_base_url: config.public_base_url.clone(),
            temp_dir: config.temp_dir.clone(),
        })
    }

    /// Use `dir` for temporary local stores.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn s3(&self) -> &S3Client {
        &self.s3
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }
}

fn build_http_client(config: &StorageConfig) -> ResourceResult<reqwest::Client> {
    // Redirects are followed by the HTTP driver itself.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.http_timeout)
        .user_agent(concat!("tfleet/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ResourceError::Config(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
pub(crate) async fn test_context() -> StorageContext {
    let config = StorageConfig {
        endpoint_url: Some("http://127.0.0.1:9".to_string()),
        access_key_id: Some("test".to_string()),
        secret_access_key: Some("test".to_string()),
        http_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    };
    StorageContext::from_config(&config)
        .await
        .expect("test storage context")
}
