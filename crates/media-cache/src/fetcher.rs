//! Remote media fetching

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = "desktop-media-cache/0.1";

/// Source of remote bytes for the cache.
///
/// Implementations write the complete body to `dest` and return the number
/// of bytes written. The cache owns `dest` and handles cleanup on failure.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// HTTP client for fetching media from the asset backend
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!(url = %url, dest = ?dest, "Fetching media");

        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to fetch media");
            return Err(CacheError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(url = %url, size = written, "Fetched media");
        Ok(written)
    }
}
