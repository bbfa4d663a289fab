//! Test infrastructure for Darkroom.
//!
//! Hermetic tests build a [`Harness`] over instrumented in-memory tiers and
//! stub transforms. Tests behind the `integration` feature start NATS and
//! MinIO through testcontainers.
//!
//! # Usage
//!
//! ```ignore
//! use darkroom_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     let tier = ctx.nats_tier("test-cache").await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,darkroom_tests=debug,darkroom_pipeline=debug")),
        )
        .with_test_writer()
        .try_init();
}
