//! Layered configuration.

use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use darkroom_cache::{DurableTierConfig, MemoryTierConfig, S3Config, TieredCacheConfig};
use darkroom_hash::HasherConfig;
use darkroom_models::ModelCacheConfig;
use darkroom_nats::NatsKvConfig;
use darkroom_pipeline::PipelineConfig;
use darkroom_trace::TracingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `DARKROOM__PIPELINE__STAGE_TIMEOUT_SECS=30`.
pub const ENV_PREFIX: &str = "DARKROOM";

/// Default config file name, looked up in the working directory.
pub const DEFAULT_FILE: &str = "darkroom";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DarkroomConfig {
    pub tracing: TracingConfig,
    pub hasher: HasherConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheSection,
    pub models: ModelCacheConfig,
}

/// Cache tiers, fastest first: memory, then NATS, then the durable store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub memory: MemoryTierConfig,
    pub nats: Option<NatsKvConfig>,
    pub durable: Option<DurableSection>,
    pub tiered: TieredCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableSection {
    pub store: StoreConfig,
    #[serde(default)]
    pub tier: DurableTierConfig,
}

/// Backing object store for durable outputs and model copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    Filesystem { root: PathBuf },
    S3(S3Config),
}

impl DarkroomConfig {
    /// Load `.env`, then `path` (or `darkroom.yaml` if present), then `DARKROOM__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load_from(path, None)
    }

    /// Like [`load`](Self::load) with an explicit environment instead of the process one.
    pub fn load_from(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Yaml).required(true),
            None => File::with_name(DEFAULT_FILE)
                .format(FileFormat::Yaml)
                .required(false),
        };

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.nats.urls")
            .source(env);

        Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_trace::LogFormat;
    use std::io::Write;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = DarkroomConfig::load_from(None, env(&[])).unwrap();
        assert_eq!(config.pipeline.stage_timeout_secs, 120);
        assert_eq!(config.cache.tiered.breaker.failure_threshold, 5);
        assert!(config.cache.nats.is_none());
        assert!(config.cache.durable.is_none());
        assert!(config.models.models.is_empty());
    }

    #[test]
    fn test_yaml_then_env_layering() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
tracing:
  format: json
pipeline:
  max_parallel_effects: 2
cache:
  nats:
    bucket: OUTPUTS_TEST
  durable:
    store:
      type: filesystem
      root: /tmp/darkroom
models:
  cache_dir: /tmp/models
  models:
    - id: bg-model
      file_name: bg.onnx
      expected_size: 176000000
"#
        )
        .unwrap();

        let config = DarkroomConfig::load_from(
            Some(file.path()),
            env(&[
                ("DARKROOM__PIPELINE__MAX_PARALLEL_EFFECTS", "4"),
                ("DARKROOM__CACHE__NATS__URLS", "nats://a:4222,nats://b:4222"),
            ]),
        )
        .unwrap();

        assert_eq!(config.tracing.format, LogFormat::Json);
        assert_eq!(config.pipeline.max_parallel_effects, 4);
        let nats = config.cache.nats.unwrap();
        assert_eq!(nats.bucket, "OUTPUTS_TEST");
        assert_eq!(nats.urls, vec!["nats://a:4222", "nats://b:4222"]);
        assert!(matches!(
            config.cache.durable.unwrap().store,
            StoreConfig::Filesystem { ref root } if root == Path::new("/tmp/darkroom")
        ));
        assert_eq!(config.models.models[0].id, "bg-model");
        assert_eq!(config.models.models[0].size_tolerance, 1024 * 1024);
    }

    #[test]
    fn test_zero_stage_timeout_from_env_still_waits() {
        let config = DarkroomConfig::load_from(
            None,
            env(&[("DARKROOM__PIPELINE__STAGE_TIMEOUT_SECS", "0")]),
        )
        .unwrap();
        assert_eq!(config.pipeline.stage_timeout_secs, 0);
        assert_eq!(config.pipeline.stage_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = DarkroomConfig::load_from(Some(Path::new("/nonexistent/darkroom.yaml")), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = DarkroomConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("stage_timeout_secs: 120"));
        assert!(yaml.contains("pipeline:"));
    }
}
