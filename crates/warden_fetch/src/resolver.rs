//! The fetch fallback chain: cache, content node, HTTP mirror.

use crate::artifact::{ModuleArtifact, sha256_hex};
use crate::locator::{LocatorSource, ModuleLocator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use warden_core::config::FetchConfig;
use warden_core::metrics::WardenMetrics;
use warden_core::{WardenError, WardenResult};

/// Resolves locators to verified module artifacts.
///
/// Resolution order: content-addressed cache file, then the configured
/// local content node, then the HTTP mirror. Each network step gets its
/// own timeout and retry budget.
pub struct Resolver {
    config: FetchConfig,
    client: reqwest::Client,
    metrics: Arc<WardenMetrics>,
}

impl Resolver {
    /// Create a resolver.
    ///
    /// Falls back to the default client if the builder fails, matching a
    /// plain `reqwest::Client::new()`.
    #[must_use]
    pub fn new(config: FetchConfig, metrics: Arc<WardenMetrics>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms.min(2_000)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            metrics,
        }
    }

    /// Resolve a locator to a verified artifact, including its detached
    /// signature when one is referenced.
    ///
    /// # Errors
    ///
    /// Returns an artifact error when every step of the chain fails or
    /// the bytes do not match the expected checksum
    pub async fn resolve(&self, locator: &ModuleLocator) -> WardenResult<ModuleArtifact> {
        let cache_path = self.cache_path(locator);

        if let Some(bytes) = self.read_cache(&cache_path).await {
            // cached files are named by checksum but verified anyway
            if sha256_hex(&bytes) == locator.checksum {
                self.metrics.cache_hits.inc();
                debug!(checksum = %locator.checksum, "module cache hit");
                let artifact = ModuleArtifact::verified(locator.clone(), bytes)?
                    .with_cache_path(cache_path);
                return self.attach_signature(artifact).await;
            }
            warn!(path = %cache_path.display(), "stale cache entry, refetching");
        }

        let bytes = self.fetch_bytes(locator).await?;
        let artifact =
            ModuleArtifact::verified(locator.clone(), bytes)?.with_cache_path(cache_path.clone());
        self.write_cache(&cache_path, &artifact.bytes).await;
        self.attach_signature(artifact).await
    }

    fn cache_path(&self, locator: &ModuleLocator) -> PathBuf {
        PathBuf::from(&self.config.cache_dir).join(format!("{}.wasm", locator.checksum))
    }

    async fn read_cache(&self, path: &PathBuf) -> Option<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }

    async fn write_cache(&self, path: &PathBuf, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(err) = tokio::fs::write(path, bytes).await {
            // cache write failure is not fatal; the artifact is in memory
            warn!(error = %err, "failed to write module cache");
        }
    }

    async fn fetch_bytes(&self, locator: &ModuleLocator) -> WardenResult<Vec<u8>> {
        match &locator.source {
            LocatorSource::File(path) => tokio::fs::read(path).await.map_err(|err| {
                warn!(error = %err, "module file read failed");
                WardenError::Artifact {
                    reason: "not_found".to_string(),
                }
            }),
            LocatorSource::Url(url) => self.download_with_retry(url).await,
            LocatorSource::Cid(cid) => {
                if let Some(node) = &self.config.content_node {
                    let url = format!("{}/ipfs/{cid}", node.trim_end_matches('/'));
                    match self.download_with_retry(&url).await {
                        Ok(bytes) => return Ok(bytes),
                        Err(err) => {
                            warn!(step = "content_node", error = %err, "falling back to mirror");
                        }
                    }
                }
                let url = format!("{}/ipfs/{cid}", self.config.mirror.trim_end_matches('/'));
                self.download_with_retry(&url).await
            }
        }
    }

    async fn download_with_retry(&self, url: &str) -> WardenResult<Vec<u8>> {
        let attempts = self.config.retries.saturating_add(1);
        let mut last = WardenError::Artifact {
            reason: "fetch_failed".to_string(),
        };
        for attempt in 0..attempts {
            self.metrics.downloads.inc();
            match self.download_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    debug!(attempt, error = %err, "download attempt failed");
                    last = err;
                }
            }
        }
        Err(last)
    }

    async fn download_once(&self, url: &str) -> WardenResult<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|err| {
            warn!(error = %err, "module download failed");
            WardenError::Artifact {
                reason: "fetch_failed".to_string(),
            }
        })?;
        if !response.status().is_success() {
            return Err(WardenError::Artifact {
                reason: "fetch_failed".to_string(),
            });
        }
        let bytes = response.bytes().await.map_err(|_| WardenError::Artifact {
            reason: "fetch_failed".to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn attach_signature(&self, artifact: ModuleArtifact) -> WardenResult<ModuleArtifact> {
        let Some(sig_url) = artifact.locator.signature_url.clone() else {
            return Ok(artifact);
        };
        let sig = if let Some(path) = sig_url.strip_prefix("file://") {
            tokio::fs::read(path).await.map_err(|_| WardenError::Artifact {
                reason: "signature_unavailable".to_string(),
            })?
        } else {
            self.download_with_retry(&sig_url)
                .await
                .map_err(|_| WardenError::Artifact {
                    reason: "signature_unavailable".to_string(),
                })?
        };
        Ok(artifact.with_signature(sig))
    }
}
