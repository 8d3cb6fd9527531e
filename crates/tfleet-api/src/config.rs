//! API configuration.

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Registered uid path namespaces
    pub paths: Vec<String>,
    /// Path used when a submission names none or an unregistered one
    pub default_path: String,
    /// Max request body size
    pub max_body_size: usize,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            paths: Vec::new(),
            default_path: "default".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            paths: std::env::var("API_PATHS")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            default_path: std::env::var("API_DEFAULT_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.default_path),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Whether `path` may be used as a uid namespace.
    pub fn is_registered_path(&self, path: &str) -> bool {
        path == self.default_path || self.paths.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_is_always_registered() {
        let config = ApiConfig {
            paths: vec!["custom".into()],
            ..Default::default()
        };
        assert!(config.is_registered_path("default"));
        assert!(config.is_registered_path("custom"));
        assert!(!config.is_registered_path("other"));
    }
}
