//! Span constructors for processing sessions, stages, cache tiers and models.
//!
//! Field names are shared so log queries and trace views line up across crates.

use tracing::{Level, Span, field, span};

/// Span for one `process` call. `fingerprint` is recorded once hashing finishes.
pub fn session_span(session_id: &str, stage_count: usize, input_bytes: usize) -> Span {
    span!(
        Level::INFO,
        "session.process",
        darkroom.session.id = session_id,
        darkroom.session.stages = stage_count,
        darkroom.input.bytes = input_bytes,
        darkroom.fingerprint = field::Empty,
    )
}

/// Span for a single stage. `cache_hit` is recorded when the stage resolves.
pub fn stage_span(stage: &str, key_digest: &str) -> Span {
    span!(
        Level::INFO,
        "stage.execute",
        darkroom.stage.name = stage,
        darkroom.cache.key = key_digest,
        darkroom.cache.hit = field::Empty,
    )
}

pub fn tier_span(tier: &str, operation: &str) -> Span {
    span!(
        Level::DEBUG,
        "cache.tier",
        darkroom.cache.tier = tier,
        operation = operation,
    )
}

pub fn model_span(model_id: &str) -> Span {
    span!(
        Level::INFO,
        "model.resolve",
        darkroom.model.id = model_id,
        darkroom.model.source = field::Empty,
    )
}
