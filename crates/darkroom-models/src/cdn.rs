//! HTTP CDN artifact source with resumable downloads.

use crate::config::{CdnConfig, ModelSpec};
use crate::source::ArtifactSource;
use async_trait::async_trait;
use darkroom_core::{Error, Result};
use futures::StreamExt;
use reqwest::{StatusCode, header};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub struct CdnSource {
    client: reqwest::Client,
    config: CdnConfig,
}

impl CdnSource {
    pub fn new(config: CdnConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(base: &str, spec: &ModelSpec) -> String {
        format!("{}/{}/{}", base.trim_end_matches('/'), spec.id, spec.file_name)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// One download attempt, resuming from whatever `staging` already holds.
    async fn download(&self, url: &str, staging: &Path) -> Result<bool> {
        let offset = match tokio::fs::metadata(staging).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.authorize(self.client.get(url));
        if offset > 0 {
            debug!(url = %url, offset, "Resuming partial download");
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch model: {}", e)))?;

        let status = response.status();
        let resumed = match status {
            StatusCode::NOT_FOUND => return Ok(false),
            StatusCode::PARTIAL_CONTENT if offset > 0 => true,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let _ = tokio::fs::remove_file(staging).await;
                return Err(Error::Network(
                    "CDN rejected resume range, restarting download".to_string(),
                ));
            }
            s if s.is_success() => false,
            s if s.is_server_error() => {
                return Err(Error::Network(format!("CDN returned error: {}", s)));
            }
            s => return Err(Error::Internal(format!("CDN returned error: {}", s))),
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if resumed {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options
            .open(staging)
            .await
            .map_err(|e| Error::Internal(format!("Failed to open staging file: {}", e)))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::Network(format!("Model download interrupted: {}", e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(true)
    }
}

#[async_trait]
impl ArtifactSource for CdnSource {
    fn name(&self) -> &str {
        "cdn"
    }

    async fn fetch(&self, spec: &ModelSpec, staging: &Path) -> Result<bool> {
        let url = Self::url(&self.config.base_url, spec);
        let mut attempt = 0;

        loop {
            match self.download(&url, staging).await {
                Ok(found) => return Ok(found),
                Err(e) if attempt < self.config.retries && e.is_retryable() => {
                    let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                    attempt += 1;
                    warn!(
                        model = %spec.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "CDN download failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn publish(&self, spec: &ModelSpec, path: &Path) -> Result<()> {
        let base = self
            .config
            .publish_url
            .as_deref()
            .unwrap_or(&self.config.base_url);
        let url = Self::url(base, spec);

        let body = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read model: {}", e)))?;

        let response = self
            .authorize(self.client.put(&url))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to publish model: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "CDN rejected publish: {}",
                response.status()
            )));
        }

        info!(model = %spec.id, url = %url, "Model republished to CDN");
        Ok(())
    }
}

/// Base delay doubled once per prior attempt, saturating.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
