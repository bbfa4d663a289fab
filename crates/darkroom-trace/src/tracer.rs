//! Subscriber and exporter initialization.

use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to initialize tracer: {0}")]
    Init(String),
    #[error("Unsupported OTLP protocol: {0:?}")]
    UnsupportedProtocol(Protocol),
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_export_timeout")]
    pub timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_export_timeout() -> u64 {
    10
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            protocol: Protocol::default(),
            timeout_seconds: default_export_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Grpc,
    HttpProtobuf,
}

/// Shape of log lines on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "darkroom".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            service_name: default_service_name(),
            sample_rate: default_sample_rate(),
            otlp: None,
            resource_attributes: HashMap::new(),
        }
    }
}

impl TracingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_otlp(mut self, otlp: OtlpConfig) -> Self {
        self.otlp = Some(otlp);
        self
    }

    fn sampler(&self) -> Sampler {
        if self.sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_rate)
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber. Fails if one is already installed.
///
/// Must be called inside a Tokio runtime when OTLP export is configured.
pub fn init_tracer(config: &TracingConfig) -> Result<(), TracerError> {
    let mut layers: Vec<BoxedLayer> = vec![match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_target(true).boxed(),
    }];
    if let Some(otlp) = &config.otlp {
        layers.push(otlp_layer(config, otlp)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.env_filter())
        .try_init()
        .map_err(|e| TracerError::Init(e.to_string()))
}

fn otlp_layer(
    config: &TracingConfig,
    otlp: &OtlpConfig,
) -> Result<BoxedLayer, TracerError> {
    if otlp.protocol != Protocol::Grpc {
        return Err(TracerError::UnsupportedProtocol(otlp.protocol));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp.endpoint)
        .with_timeout(Duration::from_secs(otlp.timeout_seconds))
        .build()
        .map_err(|e| TracerError::Init(e.to_string()))?;

    let mut attrs = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    for (key, value) in &config.resource_attributes {
        attrs.push(KeyValue::new(key.clone(), value.clone()));
    }

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(attrs))
        .build();

    let tracer = provider.tracer("darkroom");
    global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush and shut down the OTLP exporter, if one was installed.
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.service_name, "darkroom");
        assert!(config.otlp.is_none());
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: TracingConfig =
            serde_json::from_str(r#"{"format":"json","otlp":{"endpoint":"http://otel:4317"}}"#)
                .unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        let otlp = config.otlp.unwrap();
        assert_eq!(otlp.endpoint, "http://otel:4317");
        assert_eq!(otlp.protocol, Protocol::Grpc);
        assert_eq!(otlp.timeout_seconds, 10);
    }

    #[test]
    fn test_sampler_bounds() {
        let mut config = TracingConfig::default();
        assert!(matches!(config.sampler(), Sampler::AlwaysOn));
        config.sample_rate = 0.0;
        assert!(matches!(config.sampler(), Sampler::AlwaysOff));
        config.sample_rate = 0.25;
        assert!(matches!(config.sampler(), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }

    #[test]
    fn test_http_protocol_rejected() {
        let otlp = OtlpConfig {
            protocol: Protocol::HttpProtobuf,
            ..Default::default()
        };
        let err = otlp_layer(&TracingConfig::default(), &otlp).err().unwrap();
        assert!(matches!(err, TracerError::UnsupportedProtocol(Protocol::HttpProtobuf)));
    }
}
