//! In-memory fetcher and cache builders for unit tests

use async_trait::async_trait;
use media_cache::{AssetDescriptor, AssetKind, CacheConfig, CacheError, MediaCache, MediaFetcher};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

/// Serves fixed bodies keyed by asset id; anything else is a 404
pub struct MapFetcher {
    bodies: HashMap<String, String>,
    /// Ids whose fetch waits for a permit on `gate` before writing
    gated: HashSet<String>,
    gate: Arc<Notify>,
}

#[async_trait]
impl MediaFetcher for MapFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> media_cache::Result<u64> {
        if self.gated.iter().any(|id| url == asset_url(id)) {
            self.gate.notified().await;
        }
        let body = self
            .bodies
            .iter()
            .find(|(id, _)| url == asset_url(id))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| CacheError::Status {
                status: 404,
                url: url.to_string(),
            })?;
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }
}

pub fn asset_url(id: &str) -> String {
    format!("https://cdn.test/media/{id}.mp4")
}

pub fn descriptor(id: &str) -> AssetDescriptor {
    AssetDescriptor::new(id, asset_url(id), AssetKind::Video)
}

pub async fn cache_with(dir: &Path, bodies: &[(&str, &str)]) -> Arc<MediaCache> {
    gated_cache_with(dir, bodies, &[]).await.0
}

/// Cache whose fetches of `gated` ids block until the returned gate is
/// notified
pub async fn gated_cache_with(
    dir: &Path,
    bodies: &[(&str, &str)],
    gated: &[&str],
) -> (Arc<MediaCache>, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    let fetcher = MapFetcher {
        bodies: bodies
            .iter()
            .map(|(id, body)| (id.to_string(), body.to_string()))
            .collect(),
        gated: gated.iter().map(|id| id.to_string()).collect(),
        gate: gate.clone(),
    };
    let cache = MediaCache::new(
        CacheConfig {
            cache_dir: dir.join("media"),
            max_size: 1024 * 1024,
            download_concurrency: 2,
            preload_limit: 24,
        },
        Arc::new(fetcher),
    );
    cache.init().await.unwrap();
    (cache, gate)
}
