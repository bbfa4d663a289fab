//! Model cache configuration and the model registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One registered model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub file_name: String,
    pub expected_size: u64,
    /// Allowed absolute difference between actual and expected size.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: u64,
    /// Lowercase hex SHA-256; verified on download when present.
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_size_tolerance() -> u64 {
    1024 * 1024
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, expected_size: u64) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            expected_size,
            size_tolerance: default_size_tolerance(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_size_tolerance(mut self, tolerance: u64) -> Self {
        self.size_tolerance = tolerance;
        self
    }

    pub fn size_acceptable(&self, actual: u64) -> bool {
        actual.abs_diff(self.expected_size) <= self.size_tolerance
    }
}

/// CDN endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Download base; artifacts live at `<base_url>/<model_id>/<file_name>`.
    pub base_url: String,

    /// Upload base for republishing. Defaults to `base_url`.
    #[serde(default)]
    pub publish_url: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,

    /// Extra attempts after the first transient failure.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    600
}

impl CdnConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            publish_url: None,
            auth_token: None,
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCacheConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Local copies older than this are refreshed.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default)]
    pub cdn: Option<CdnConfig>,

    /// Object-store prefix for durable copies.
    #[serde(default = "default_durable_prefix")]
    pub durable_prefix: String,

    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/darkroom/models")
}

fn default_max_age_secs() -> u64 {
    86400
}

fn default_durable_prefix() -> String {
    "models".to_string()
}

impl Default for ModelCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_age_secs: default_max_age_secs(),
            cdn: None,
            durable_prefix: default_durable_prefix(),
            models: Vec::new(),
        }
    }
}

impl ModelCacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, spec: ModelSpec) -> Self {
        self.models.push(spec);
        self
    }

    pub fn with_cdn(mut self, cdn: CdnConfig) -> Self {
        self.cdn = Some(cdn);
        self
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_tolerance() {
        let spec = ModelSpec::new("bg", "bg.onnx", 10 * 1024 * 1024);
        assert!(spec.size_acceptable(10 * 1024 * 1024 + 1024 * 1024));
        assert!(spec.size_acceptable(9 * 1024 * 1024));
        assert!(!spec.size_acceptable(10 * 1024 * 1024 + 1024 * 1024 + 1));
        assert!(!spec.size_acceptable(0));
    }

    #[test]
    fn test_spec_defaults() {
        let spec: ModelSpec =
            serde_json::from_str(r#"{"id":"bg","file_name":"bg.onnx","expected_size":5}"#).unwrap();
        assert_eq!(spec.size_tolerance, 1024 * 1024);
        assert!(spec.sha256.is_none());
    }
}
