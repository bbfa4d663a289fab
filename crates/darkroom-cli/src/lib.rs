//! Darkroom composition root.
//!
//! [`DarkroomConfig`] layers defaults, an optional YAML file and `DARKROOM__`
//! environment variables. [`App`] turns it into the cache tiers, model
//! artifact cache and pipeline that a service or the `darkroom` binary uses.

pub mod app;
pub mod config;

pub use app::App;
pub use config::{CacheSection, DarkroomConfig, DurableSection, StoreConfig};
