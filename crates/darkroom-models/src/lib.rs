//! Model artifact caching and loading.
//!
//! Model files are resolved local cache first, then CDN, then the durable
//! object store; [`ModelProvider`] loads each resolved model once.

pub mod artifact;
pub mod cdn;
pub mod config;
pub mod provider;
pub mod source;

pub use artifact::ModelArtifactCache;
pub use cdn::CdnSource;
pub use config::{CdnConfig, ModelCacheConfig, ModelSpec};
pub use provider::{ModelLoader, ModelProvider};
pub use source::{ArtifactSource, ObjectStoreSource};
