//! S3-compatible object store (AWS S3, R2, MinIO).

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use darkroom_core::ports::{ObjectMetadata, ObjectStore, StoredObject};
use darkroom_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// S3 connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Required by most non-AWS endpoints.
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = true;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS configuration plus `config` overrides.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::Config("S3 bucket must be set".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "S3 object store configured");

        Ok(Self::from_client(Client::from_conf(s3_config), &config.bucket))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn get_object(&self, path: &str) -> Result<Option<StoredObject>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                {
                    return Ok(None);
                }
                return Err(Error::Network(format!("S3 get {} failed: {}", path, err)));
            }
        };

        let metadata = ObjectMetadata {
            content_type: output.content_type().map(str::to_string),
            attributes: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Network(format!("S3 read {} failed: {}", path, e)))?
            .into_bytes();

        Ok(Some(StoredObject { body, metadata }))
    }

    async fn put_object(&self, path: &str, body: Bytes, metadata: ObjectMetadata) -> Result<()> {
        let attributes: HashMap<String, String> = metadata.attributes.into_iter().collect();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(body))
            .set_content_type(metadata.content_type)
            .set_metadata(Some(attributes))
            .send()
            .await
            .map_err(|e| Error::Network(format!("S3 put {} failed: {}", path, e)))?;
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| Error::Network(format!("S3 delete {} failed: {}", path, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_endpoint_forces_path_style() {
        let config = S3Config::new("outputs").with_endpoint("http://localhost:9000");
        assert!(config.force_path_style);
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[tokio::test]
    async fn test_empty_bucket_rejected() {
        assert!(matches!(
            S3ObjectStore::connect(&S3Config::default()).await,
            Err(Error::Config(_))
        ));
    }
}
