//! Filesystem-backed object store for local development and tests.

use async_trait::async_trait;
use bytes::Bytes;
use darkroom_core::ports::{ObjectMetadata, ObjectStore, StoredObject};
use darkroom_core::{Error, Result};
use std::path::{Component, Path, PathBuf};

const METADATA_SUFFIX: &str = ".meta.json";

/// Stores each object as a file plus a JSON sidecar holding its metadata.
pub struct FilesystemObjectStore {
    root_dir: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(Error::InvalidRequest(format!("invalid object path: {}", path)));
        }
        Ok(self.root_dir.join(relative))
    }

    fn metadata_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_os_string();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::Internal(format!("Failed to write object: {}", e)))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::Internal(format!("Failed to commit object: {}", e)));
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Internal(format!("Failed to read object: {}", e))),
    }
}

async fn remove_optional(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Internal(format!("Failed to delete object: {}", e))),
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn get_object(&self, path: &str) -> Result<Option<StoredObject>> {
        let object_path = self.object_path(path)?;
        let Some(body) = read_optional(&object_path).await? else {
            return Ok(None);
        };

        // A missing or unreadable sidecar yields empty metadata.
        let metadata = read_optional(&Self::metadata_path(&object_path))
            .await?
            .and_then(|raw| serde_json::from_slice::<ObjectMetadata>(&raw).ok())
            .unwrap_or_default();

        Ok(Some(StoredObject {
            body: Bytes::from(body),
            metadata,
        }))
    }

    async fn put_object(&self, path: &str, body: Bytes, metadata: ObjectMetadata) -> Result<()> {
        let object_path = self.object_path(path)?;
        if let Some(parent) = object_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Internal(format!("Failed to create object dir: {}", e)))?;
        }

        let sidecar = serde_json::to_vec(&metadata)?;
        write_atomic(&Self::metadata_path(&object_path), &sidecar).await?;
        write_atomic(&object_path, &body).await
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let object_path = self.object_path(path)?;
        remove_optional(&object_path).await?;
        remove_optional(&Self::metadata_path(&object_path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());

        let metadata = ObjectMetadata::default()
            .with_content_type("image/png")
            .with_attribute("ttl_secs", "60");
        store
            .put_object("outputs/ab/abcd.png", Bytes::from_static(b"png"), metadata.clone())
            .await
            .unwrap();

        let object = store.get_object("outputs/ab/abcd.png").await.unwrap().unwrap();
        assert_eq!(object.body, "png");
        assert_eq!(object.metadata, metadata);

        store.delete_object("outputs/ab/abcd.png").await.unwrap();
        assert!(store.get_object("outputs/ab/abcd.png").await.unwrap().is_none());
        store.delete_object("outputs/ab/abcd.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_sidecar_gives_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        std::fs::write(dir.path().join("loose.bin"), b"raw").unwrap();

        let object = store.get_object("loose.bin").await.unwrap().unwrap();
        assert_eq!(object.metadata, ObjectMetadata::default());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        for path in ["../etc/passwd", "/abs", ""] {
            assert!(matches!(
                store.get_object(path).await,
                Err(Error::InvalidRequest(_))
            ));
        }
    }
}
