//! Storage driver configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for resource drivers.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Custom S3 endpoint (MinIO, R2, ...). Uses path-style addressing when set.
    pub endpoint_url: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Region
    pub region: String,
    /// Base for public object URLs, replacing `https://<bucket>.s3.amazonaws.com`
    pub public_base_url: Option<String>,
    /// Timeout for HTTP resource transfers
    pub http_timeout: Duration,
    /// Directory for temporary local stores (system temp dir when unset).
    /// Set by the worker from its work directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            public_base_url: None,
            http_timeout: Duration::from_secs(300),
            temp_dir: None,
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            endpoint_url: non_empty("S3_ENDPOINT_URL"),
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            region: non_empty("AWS_REGION").unwrap_or(defaults.region),
            public_base_url: non_empty("S3_PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            http_timeout: std::env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            temp_dir: None,
        }
    }
}
