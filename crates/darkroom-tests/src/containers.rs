//! Testcontainer configurations for integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::{minio::MinIO, nats::Nats};

/// NATS server with JetStream enabled, backing the shared cache tier.
pub struct NatsContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Nats>,
    url: String,
}

impl NatsContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Nats::default()
            .with_tag("2.10-alpine")
            .with_cmd(["-js"])
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(4222).await?;

        Ok(Self {
            container,
            url: format!("nats://{}:{}", host, port),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// MinIO server standing in for S3 in durable tier tests.
pub struct MinioContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<MinIO>,
    endpoint: String,
}

impl MinioContainer {
    pub const ACCESS_KEY: &'static str = "minioadmin";
    pub const SECRET_KEY: &'static str = "minioadmin";

    pub async fn start() -> anyhow::Result<Self> {
        let container = MinIO::default().with_tag("latest").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(9000).await?;

        Ok(Self {
            container,
            endpoint: format!("http://{}:{}", host, port),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
