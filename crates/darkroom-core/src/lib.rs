//! Darkroom Core
//!
//! Core domain types, traits, and error handling for Darkroom.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: fingerprints, cache keys, stage kinds,
//! sessions, progress events and the port traits adapters implement.

pub mod error;
pub mod events;
pub mod fingerprint;
pub mod ids;
pub mod key;
pub mod ports;
pub mod session;
pub mod stage;

pub use error::{ComputeError, ComputeErrorKind, Error, Result};
pub use fingerprint::{ContentFingerprint, ParamValue, StageParams};
pub use ids::*;
pub use key::CacheKey;
pub use session::{Session, StageOutcome, StageRecord, TerminalState};
pub use stage::{EffectKind, StageKind, StageSpec};
