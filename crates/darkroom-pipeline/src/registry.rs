//! Transform registry.

use darkroom_core::ports::Transform;
use darkroom_core::{Error, Result, StageKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Maps stage kinds to their transform implementations. Built once at startup.
#[derive(Default, Clone)]
pub struct TransformRegistry {
    transforms: HashMap<StageKind, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: StageKind, transform: Arc<dyn Transform>) {
        info!(stage = %kind, version = transform.version(), "Registered transform");
        self.transforms.insert(kind, transform);
    }

    pub fn with(mut self, kind: StageKind, transform: Arc<dyn Transform>) -> Self {
        self.register(kind, transform);
        self
    }

    pub fn get(&self, kind: &StageKind) -> Option<Arc<dyn Transform>> {
        self.transforms.get(kind).cloned()
    }

    pub fn require(&self, kind: &StageKind) -> Result<Arc<dyn Transform>> {
        self.get(kind)
            .ok_or_else(|| Error::InvalidRequest(format!("no transform registered for {}", kind)))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &StageKind> {
        self.transforms.keys()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}
