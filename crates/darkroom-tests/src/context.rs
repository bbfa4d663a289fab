//! Running services plus clients for the adapters under test.

use crate::containers::{MinioContainer, NatsContainer};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use darkroom_cache::S3ObjectStore;
use darkroom_nats::{KvStorage, NatsKvConfig, NatsKvTier};

/// NATS and MinIO containers. Drop this to stop them.
pub struct TestContext {
    pub nats: NatsContainer,
    pub minio: MinioContainer,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let (nats, minio) = tokio::try_join!(NatsContainer::start(), MinioContainer::start())?;
        Ok(Self { nats, minio })
    }

    /// Config for a fresh in-memory KV bucket on this context's server.
    pub fn nats_config(&self, bucket: &str) -> NatsKvConfig {
        let mut config = NatsKvConfig::new(self.nats.url()).with_bucket(bucket);
        config.storage = KvStorage::Memory;
        config
    }

    pub async fn nats_tier(&self, bucket: &str) -> anyhow::Result<NatsKvTier> {
        Ok(NatsKvTier::connect(self.nats_config(bucket)).await?)
    }

    /// An object store over a newly created bucket.
    pub async fn s3_store(&self, bucket: &str) -> anyhow::Result<S3ObjectStore> {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.minio.endpoint())
            .credentials_provider(Credentials::new(
                MinioContainer::ACCESS_KEY,
                MinioContainer::SECRET_KEY,
                None,
                None,
                "darkroom-tests",
            ))
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(config);
        client.create_bucket().bucket(bucket).send().await?;
        Ok(S3ObjectStore::from_client(client, bucket))
    }
}
