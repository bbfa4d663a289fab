//! Error types for Darkroom.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Input errors
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Stage errors
    #[error("Stage {stage} failed: {message}")]
    Compute { stage: String, message: String },

    // Cache errors
    #[error("Cache tier {tier} unavailable: {message}")]
    CacheTier { tier: String, message: String },

    // Model errors
    #[error("Model {model_id} unavailable after trying {attempts:?}")]
    ModelUnavailable {
        model_id: String,
        attempts: Vec<String>,
    },

    #[error("Model {model_id} failed to load: {message}")]
    ModelLoad { model_id: String, message: String },

    // Resource errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a tier failure.
    pub fn tier(tier: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::CacheTier {
            tier: tier.into(),
            message: message.to_string(),
        }
    }

    /// Whether the caller sent something we can never process.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::InvalidRequest(_))
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Decode failures and exhausted model tiers are never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CacheTier { .. } | Error::Network(_) | Error::Timeout { .. } | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Why a single stage produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeErrorKind {
    /// The transform returned an error.
    Failed,
    /// The stage exceeded its deadline.
    Timeout,
    /// The stage's input could not be produced.
    UpstreamFailed,
    /// No transform is registered for the stage.
    NotRegistered,
}

/// A per-stage failure. Recorded in the session, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{stage}: {kind:?}: {message}")]
pub struct ComputeError {
    pub stage: String,
    pub kind: ComputeErrorKind,
    pub message: String,
}

impl ComputeError {
    pub fn new(stage: impl Into<String>, kind: ComputeErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ComputeErrorKind::Failed, message)
    }

    pub fn timeout(stage: impl Into<String>, millis: u64) -> Self {
        Self::new(
            stage,
            ComputeErrorKind::Timeout,
            format!("exceeded {}ms deadline", millis),
        )
    }
}

impl From<ComputeError> for Error {
    fn from(err: ComputeError) -> Self {
        Error::Compute {
            stage: err.stage,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Decode("truncated".into()).is_client_error());
        assert!(!Error::Decode("truncated".into()).is_retryable());

        let unavailable = Error::ModelUnavailable {
            model_id: "bg-model".into(),
            attempts: vec!["local".into(), "cdn".into(), "durable".into()],
        };
        assert!(!unavailable.is_client_error());
        assert!(!unavailable.is_retryable());

        assert!(Error::tier("memory", "boom").is_retryable());
    }

    #[test]
    fn test_compute_error_into_error() {
        let err: Error = ComputeError::failed("effect:dither", "bad palette").into();
        assert!(matches!(err, Error::Compute { ref stage, .. } if stage == "effect:dither"));
    }
}
