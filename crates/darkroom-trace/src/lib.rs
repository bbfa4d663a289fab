//! Tracing setup for Darkroom.
//!
//! Installs a `tracing` subscriber with an env filter and either plain or JSON
//! output, optionally exporting spans over OTLP, and provides span
//! constructors shared by the pipeline, cache tiers and model loading.

pub mod spans;
pub mod tracer;

pub use spans::{model_span, session_span, stage_span, tier_span};
pub use tracer::{
    LogFormat, OtlpConfig, Protocol, TracerError, TracingConfig, init_tracer, shutdown_tracer,
};
