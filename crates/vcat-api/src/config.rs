//! API configuration.

use std::path::PathBuf;

use vcat_queue::QueueConfig;
use vcat_store::StoreConfig;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/videos`
    pub output_root: PathBuf,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    pub metrics_enabled: bool,
    pub queue: QueueConfig,
    pub store: StoreConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            output_root: PathBuf::from("/transcoded"),
            cors_origins: vec!["*".to_string()],
            metrics_enabled: true,
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load from environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            output_root: std::env::var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            queue: QueueConfig::from_env(),
            store: StoreConfig::from_env(),
        }
    }

    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.output_root, PathBuf::from("/transcoded"));
        assert_eq!(config.cors_origins, vec!["*"]);
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("http://a.test, http://b.test,"),
            vec!["http://a.test", "http://b.test"]
        );
        assert_eq!(parse_origins(" , "), vec!["*"]);
    }
}
