//! Cache keys for stage outputs.

use crate::fingerprint::{ContentFingerprint, StageParams};
use crate::stage::StageKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies the expected output of one versioned stage for one input.
///
/// `upstream` carries the digest of the key whose output feeds this stage, so an
/// effect computed over a background-removed image changes key whenever the
/// background-removal stage's version or parameters change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub stage: String,
    pub stage_version: String,
    pub content: ContentFingerprint,
    pub params: String,
    pub upstream: Option<String>,
}

impl CacheKey {
    pub fn new(
        stage: &StageKind,
        stage_version: impl Into<String>,
        content: &ContentFingerprint,
        params: &StageParams,
    ) -> Self {
        Self {
            stage: stage.name(),
            stage_version: stage_version.into(),
            content: content.clone(),
            params: params.fingerprint(),
            upstream: None,
        }
    }

    /// Chain this key onto the key of the stage that produced its input.
    pub fn with_upstream(mut self, upstream: &CacheKey) -> Self {
        self.upstream = Some(upstream.digest());
        self
    }

    /// Hex SHA-256 over the length-prefixed components.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.stage.as_str(),
            self.stage_version.as_str(),
            self.content.as_str(),
            self.params.as_str(),
            self.upstream.as_deref().unwrap_or(""),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Object path: `<namespace>/<first two hex chars>/<digest>.<ext>`.
    pub fn object_path(&self, namespace: &str, ext: &str) -> String {
        let digest = self.digest();
        let namespace = namespace.trim_end_matches('/');
        if namespace.is_empty() {
            format!("{}/{}.{}", &digest[..2], digest, ext)
        } else {
            format!("{}/{}/{}.{}", namespace, &digest[..2], digest, ext)
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            self.stage,
            self.stage_version,
            self.content.short()
        )
    }
}
