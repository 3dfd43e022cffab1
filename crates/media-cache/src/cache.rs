//! File-based media cache with in-memory LRU index

use crate::error::{CacheError, Result};
use crate::fetcher::MediaFetcher;
use crate::index::CacheIndex;
use crate::naming::{cache_key, derive_file_name, format_bytes, url_extension};
use crate::types::{
    Artifact, AssetDescriptor, CacheEntry, CacheLookup, CacheSize, CacheStats, CachedFile,
    ClearReport, PrepareItemResult, PrepareReport,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FILES_DIR: &str = "files";
const THUMBNAILS_DIR: &str = "thumbnails";
const STAGING_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.json";
const DEFAULT_THUMBNAIL_EXT: &str = "jpg";

/// Configuration for the media cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// Byte ceiling across all cached artifacts
    pub max_size: u64,
    /// Simultaneous downloads within one batch
    pub download_concurrency: usize,
    /// Items considered by a single preload
    pub preload_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/media"),
            max_size: 5 * 1024 * 1024 * 1024, // 5GB
            download_concurrency: 4,
            preload_limit: 24,
        }
    }
}

type Outcome = std::result::Result<CachedFile, CacheError>;
type FlightKey = (String, Artifact);

struct InFlight {
    generation: u64,
    done: Shared<BoxFuture<'static, Outcome>>,
    cancel: CancellationToken,
    waiters: usize,
}

struct State {
    index: CacheIndex,
    in_flight: HashMap<FlightKey, InFlight>,
    next_generation: u64,
}

impl State {
    fn busy_assets(&self) -> HashSet<&str> {
        self.in_flight.keys().map(|(id, _)| id.as_str()).collect()
    }
}

/// Bounded media cache shared by every bridge operation
pub struct MediaCache {
    /// Cache root, byte ceiling and fan-out limits
    config: CacheConfig,
    /// Source of remote bytes
    fetcher: Arc<dyn MediaFetcher>,
    /// Index and in-flight downloads, always changed together
    state: Mutex<State>,
    /// Lookups answered from disk
    hits: AtomicU64,
    /// Lookups that found nothing usable
    misses: AtomicU64,
    /// Artifacts committed after a fetch
    downloads: AtomicU64,
    /// Entries removed to make room
    evictions: AtomicU64,
}

impl MediaCache {
    pub fn new(config: CacheConfig, fetcher: Arc<dyn MediaFetcher>) -> Arc<Self> {
        Arc::new(Self {
            config,
            fetcher,
            state: Mutex::new(State {
                index: CacheIndex::new(),
                in_flight: HashMap::new(),
                next_generation: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn files_dir(&self) -> PathBuf {
        self.config.cache_dir.join(FILES_DIR)
    }

    fn thumbnails_dir(&self) -> PathBuf {
        self.config.cache_dir.join(THUMBNAILS_DIR)
    }

    fn staging_dir(&self) -> PathBuf {
        self.config.cache_dir.join(STAGING_DIR)
    }

    fn index_path(&self) -> PathBuf {
        self.config.cache_dir.join(INDEX_FILE)
    }

    /// Create the cache layout, drop interrupted downloads and load the
    /// persisted index, forgetting entries whose files are gone
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.files_dir()).await?;
        fs::create_dir_all(self.thumbnails_dir()).await?;
        fs::create_dir_all(self.staging_dir()).await?;

        let mut staged = fs::read_dir(self.staging_dir()).await?;
        while let Some(leftover) = staged.next_entry().await? {
            if let Err(e) = fs::remove_file(leftover.path()).await {
                warn!(path = ?leftover.path(), error = %e, "Failed to remove staged download");
            }
        }

        let mut index = match CacheIndex::load(&self.index_path()).await {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Cache index unreadable, starting empty");
                CacheIndex::new()
            }
        };

        let mut dropped = 0;
        let recorded: Vec<(String, Artifact, CachedFile)> = index
            .entries()
            .flat_map(|entry| {
                [Artifact::Primary, Artifact::Thumbnail]
                    .into_iter()
                    .filter_map(|artifact| {
                        entry
                            .artifact(artifact)
                            .map(|file| (entry.asset_id.clone(), artifact, file.clone()))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        for (asset_id, artifact, file) in recorded {
            if !is_resident(&file).await {
                index.remove_artifact(&asset_id, artifact);
                let _ = fs::remove_file(&file.path).await;
                dropped += 1;
            }
        }

        let mut state = self.state.lock().await;
        state.index = index;
        if let Err(e) = self.make_room(&mut state, 0, 0, None).await {
            warn!(error = %e, "Cache over capacity after load");
        }
        self.persist(&state.index).await;

        info!(
            cache_dir = ?self.config.cache_dir,
            entries = state.index.len(),
            total_size = state.index.total_bytes(),
            dropped,
            "Cache initialized"
        );
        Ok(())
    }

    /// Ensure the primary file of an asset is on disk and return it
    pub async fn ensure_cached(
        self: &Arc<Self>,
        desc: &AssetDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedFile> {
        self.ensure_artifact(desc, Artifact::Primary, cancel).await
    }

    /// Ensure the thumbnail of an asset is on disk and return it
    pub async fn ensure_thumbnail(
        self: &Arc<Self>,
        desc: &AssetDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedFile> {
        self.ensure_artifact(desc, Artifact::Thumbnail, cancel).await
    }

    async fn ensure_artifact(
        self: &Arc<Self>,
        desc: &AssetDescriptor,
        artifact: Artifact,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedFile> {
        validate(desc, artifact)?;
        let key: FlightKey = (desc.id.clone(), artifact);

        let (generation, done) = {
            let mut state = self.state.lock().await;

            if let Some(file) = self.check_resident(&mut state, &desc.id, artifact).await {
                return Ok(file);
            }
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(CacheError::Cancelled);
            }

            let attached = match state.in_flight.get_mut(&key) {
                Some(flight) if !flight.cancel.is_cancelled() => {
                    flight.waiters += 1;
                    Some((flight.generation, flight.done.clone()))
                }
                _ => None,
            };

            match attached {
                Some(joined) => {
                    debug!(asset_id = %desc.id, ?artifact, "Attached to in-flight download");
                    joined
                }
                None => self.start_download(&mut state, desc, artifact),
            }
        };

        let Some(token) = cancel else {
            return done.await;
        };

        tokio::select! {
            biased;
            outcome = done => outcome,
            _ = token.cancelled() => {
                self.detach(&key, generation).await;
                Err(CacheError::Cancelled)
            }
        }
    }

    fn start_download(
        self: &Arc<Self>,
        state: &mut State,
        desc: &AssetDescriptor,
        artifact: Artifact,
    ) -> (u64, Shared<BoxFuture<'static, Outcome>>) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let cancel = CancellationToken::new();
        let task: JoinHandle<Outcome> = tokio::spawn({
            let cache = Arc::clone(self);
            let desc = desc.clone();
            let cancel = cancel.clone();
            async move { cache.run_download(desc, artifact, generation, cancel).await }
        });

        let done = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(CacheError::Index(format!("download task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            (desc.id.clone(), artifact),
            InFlight {
                generation,
                done: done.clone(),
                cancel,
                waiters: 1,
            },
        );
        debug!(asset_id = %desc.id, ?artifact, generation, "Started download");

        (generation, done)
    }

    /// A waiter gave up; the last one out cancels the download
    async fn detach(&self, key: &FlightKey, generation: u64) {
        let mut state = self.state.lock().await;
        if let Some(flight) = state.in_flight.get_mut(key) {
            if flight.generation == generation {
                flight.waiters = flight.waiters.saturating_sub(1);
                if flight.waiters == 0 {
                    debug!(asset_id = %key.0, artifact = ?key.1, "Cancelling abandoned download");
                    flight.cancel.cancel();
                }
            }
        }
    }

    async fn run_download(
        self: Arc<Self>,
        desc: AssetDescriptor,
        artifact: Artifact,
        generation: u64,
        cancel: CancellationToken,
    ) -> Outcome {
        let url = source_url(&desc, artifact).unwrap_or(desc.url.as_str()).to_string();
        let staged = self.staging_dir().join(format!(
            "{}.{}.{}.part",
            cache_key(&desc.id),
            artifact_tag(artifact),
            generation
        ));

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            result = self.fetcher.fetch_to(&url, &staged) => result,
        };

        let mut state = self.state.lock().await;
        let outcome = match fetched {
            Ok(_) => self.commit(&mut state, &desc, artifact, &staged).await,
            Err(e) => Err(e),
        };

        let key: FlightKey = (desc.id.clone(), artifact);
        if state
            .in_flight
            .get(&key)
            .is_some_and(|flight| flight.generation == generation)
        {
            state.in_flight.remove(&key);
        }

        match &outcome {
            Ok(file) => {
                self.persist(&state.index).await;
                info!(asset_id = %desc.id, ?artifact, size = file.size, path = ?file.path, "Cached media");
            }
            Err(e) => {
                drop(state);
                remove_if_present(&staged).await;
                warn!(asset_id = %desc.id, ?artifact, url = %url, error = %e, "Download failed");
            }
        }

        outcome
    }

    /// Verify the staged file, make room and move it into place
    async fn commit(
        &self,
        state: &mut State,
        desc: &AssetDescriptor,
        artifact: Artifact,
        staged: &Path,
    ) -> Outcome {
        let size = fs::metadata(staged).await?.len();
        if size == 0 {
            return Err(CacheError::EmptyBody(
                source_url(desc, artifact).unwrap_or(desc.url.as_str()).to_string(),
            ));
        }
        if size > self.config.max_size {
            return Err(CacheError::TooLarge {
                size,
                max: self.config.max_size,
            });
        }

        let previous = state
            .index
            .peek(&desc.id)
            .and_then(|entry| entry.artifact(artifact))
            .cloned();
        let replaced = previous.as_ref().map_or(0, |f| f.size);

        self.make_room(state, size, replaced, Some(desc.id.as_str())).await?;

        let key = cache_key(&desc.id);
        let file_name = derive_file_name(desc);
        let dest = match artifact {
            Artifact::Primary => {
                let dir = self.files_dir().join(&key);
                fs::create_dir_all(&dir).await?;
                dir.join(&file_name)
            }
            Artifact::Thumbnail => {
                let ext = desc
                    .thumbnail_url
                    .as_deref()
                    .and_then(url_extension)
                    .unwrap_or_else(|| DEFAULT_THUMBNAIL_EXT.to_string());
                self.thumbnails_dir().join(format!("{}.{}", key, ext))
            }
        };

        if let Some(old) = previous.as_ref().filter(|old| old.path != dest) {
            remove_if_present(&old.path).await;
        }
        fs::rename(staged, &dest).await?;

        let mut entry = state
            .index
            .peek(&desc.id)
            .cloned()
            .unwrap_or_else(|| CacheEntry::new(&desc.id, &file_name, &desc.url));
        if artifact == Artifact::Primary {
            entry.file_name = file_name;
            entry.source_url = desc.url.clone();
        }
        let file = CachedFile { path: dest, size };
        *entry.artifact_mut(artifact) = Some(file.clone());
        entry.last_accessed_at = chrono::Utc::now();
        state.index.upsert(entry);

        self.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(file)
    }

    /// Evict least recently accessed entries until `incoming` bytes fit.
    ///
    /// `replaced` is the size of the artifact being overwritten; entries
    /// with a download in flight and the `protect`ed asset are skipped.
    async fn make_room(
        &self,
        state: &mut State,
        incoming: u64,
        replaced: u64,
        protect: Option<&str>,
    ) -> Result<()> {
        let max = self.config.max_size;
        let fits = |total: u64| total - replaced + incoming <= max;

        if fits(state.index.total_bytes()) {
            return Ok(());
        }

        let busy: HashSet<String> = state
            .busy_assets()
            .into_iter()
            .map(str::to_string)
            .collect();
        let candidates: Vec<String> = state
            .index
            .lru_order()
            .into_iter()
            .filter(|id| Some(id.as_str()) != protect && !busy.contains(id))
            .collect();

        for asset_id in candidates {
            if fits(state.index.total_bytes()) {
                break;
            }
            if let Some(entry) = state.index.remove(&asset_id) {
                self.delete_entry_files(&entry).await;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(asset_id = %asset_id, size = entry.size_bytes(), "Evicted cache entry");
            }
        }

        let total = state.index.total_bytes();
        if fits(total) {
            Ok(())
        } else {
            Err(CacheError::CapacityExhausted {
                needed: incoming,
                available: max.saturating_sub(total - replaced),
            })
        }
    }

    async fn delete_entry_files(&self, entry: &CacheEntry) {
        for file in [&entry.primary, &entry.thumbnail].into_iter().flatten() {
            if let Err(e) = fs::remove_file(&file.path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?file.path, error = %e, "Failed to delete evicted file");
                }
            }
        }
        let _ = fs::remove_dir(self.files_dir().join(cache_key(&entry.asset_id))).await;
    }

    /// Confirm an indexed artifact is still on disk; repair the index if not
    async fn check_resident(
        &self,
        state: &mut State,
        asset_id: &str,
        artifact: Artifact,
    ) -> Option<CachedFile> {
        let recorded = state
            .index
            .peek(asset_id)
            .and_then(|entry| entry.artifact(artifact))
            .cloned();

        let Some(file) = recorded else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if is_resident(&file).await {
            state.index.touch(asset_id);
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(asset_id = %asset_id, ?artifact, "Cache hit");
            return Some(file);
        }

        warn!(asset_id = %asset_id, ?artifact, path = ?file.path, "Cached file missing, dropping entry");
        state.index.remove_artifact(asset_id, artifact);
        self.persist(&state.index).await;
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Is the primary file cached, and where. Never touches the network.
    pub async fn lookup(&self, asset_id: &str) -> CacheLookup {
        self.lookup_artifact(asset_id, Artifact::Primary).await
    }

    /// Same as [`lookup`](Self::lookup) for the thumbnail artifact
    pub async fn lookup_thumbnail(&self, asset_id: &str) -> CacheLookup {
        self.lookup_artifact(asset_id, Artifact::Thumbnail).await
    }

    async fn lookup_artifact(&self, asset_id: &str, artifact: Artifact) -> CacheLookup {
        let mut state = self.state.lock().await;
        match self.check_resident(&mut state, asset_id, artifact).await {
            Some(file) => CacheLookup::hit(file.path),
            None => CacheLookup::miss(),
        }
    }

    pub async fn size(&self) -> CacheSize {
        let bytes = self.state.lock().await.index.total_bytes();
        CacheSize {
            bytes,
            formatted: format_bytes(bytes),
            max_size: self.config.max_size,
            max_formatted: format_bytes(self.config.max_size),
        }
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.index.len(),
            total_size: state.index.total_bytes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            in_flight: state.in_flight.len(),
        }
    }

    /// Delete every cached file regardless of recency.
    ///
    /// Files that cannot be deleted keep their entries and are reported;
    /// files already gone are neither counted nor reported.
    pub async fn clear(&self) -> ClearReport {
        let mut state = self.state.lock().await;
        let mut report = ClearReport::default();

        for asset_id in state.index.lru_order() {
            for artifact in [Artifact::Primary, Artifact::Thumbnail] {
                let Some(file) = state
                    .index
                    .peek(&asset_id)
                    .and_then(|entry| entry.artifact(artifact))
                    .cloned()
                else {
                    continue;
                };

                match fs::remove_file(&file.path).await {
                    Ok(()) => {
                        report.deleted_files += 1;
                        state.index.remove_artifact(&asset_id, artifact);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        state.index.remove_artifact(&asset_id, artifact);
                    }
                    Err(e) => {
                        warn!(path = ?file.path, error = %e, "Failed to delete cached file");
                        report
                            .errors
                            .push(format!("{}: {}", file.path.display(), e));
                    }
                }
            }
            let _ = fs::remove_dir(self.files_dir().join(cache_key(&asset_id))).await;
        }

        self.persist(&state.index).await;
        info!(
            deleted_files = report.deleted_files,
            failures = report.errors.len(),
            remaining = state.index.total_bytes(),
            "Cache cleared"
        );
        report
    }

    /// Prepare a batch with bounded concurrency; results keep input order
    pub async fn prepare(
        self: &Arc<Self>,
        items: Vec<AssetDescriptor>,
        cancel: CancellationToken,
    ) -> PrepareReport {
        let concurrency = self.config.download_concurrency.max(1);
        let mut slots: Vec<Option<PrepareItemResult>> = vec![None; items.len()];

        let cache = Arc::clone(self);
        let mut pending = stream::iter(items.into_iter().enumerate())
            .map(move |(slot, desc)| {
                let cache = Arc::clone(&cache);
                let cancel = cancel.clone();
                async move { (slot, cache.prepare_one(desc, &cancel).await) }
            })
            .buffer_unordered(concurrency);

        while let Some((slot, result)) = pending.next().await {
            slots[slot] = Some(result);
        }

        let report = PrepareReport::from_results(slots.into_iter().flatten().collect());
        debug!(
            success_count = report.success_count,
            total_count = report.total_count,
            "Prepared batch"
        );
        report
    }

    async fn prepare_one(
        self: &Arc<Self>,
        desc: AssetDescriptor,
        cancel: &CancellationToken,
    ) -> PrepareItemResult {
        let file_name = derive_file_name(&desc);

        let file = match self.ensure_cached(&desc, Some(cancel)).await {
            Ok(file) => file,
            Err(e) => {
                return PrepareItemResult {
                    id: desc.id,
                    file_name,
                    success: false,
                    file_path: None,
                    thumbnail_path: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let thumbnail_path = if desc.thumbnail_url.is_some() {
            match self.ensure_thumbnail(&desc, Some(cancel)).await {
                Ok(thumb) => Some(thumb.path),
                Err(e) => {
                    warn!(asset_id = %desc.id, error = %e, "Thumbnail unavailable");
                    None
                }
            }
        } else {
            None
        };

        PrepareItemResult {
            id: desc.id,
            file_name,
            success: true,
            file_path: Some(file.path),
            thumbnail_path,
            error: None,
        }
    }

    /// Prime the cache in the background for a view that may go away.
    ///
    /// Cancelling the handle aborts downloads nobody else waits on; files
    /// that finished before the cancel stay cached.
    pub fn preload(self: &Arc<Self>, items: Vec<AssetDescriptor>) -> PreloadHandle {
        let cancel = CancellationToken::new();
        let items: Vec<AssetDescriptor> = items
            .into_iter()
            .take(self.config.preload_limit.max(1))
            .collect();
        let requested = items.len();

        let task = tokio::spawn({
            let cache = Arc::clone(self);
            let cancel = cancel.clone();
            async move {
                let report = cache.prepare(items, cancel).await;
                info!(
                    requested,
                    cached = report.success_count,
                    "Preload finished"
                );
                report
            }
        });

        PreloadHandle { cancel, task }
    }

    /// Write the index to disk
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.lock().await;
        state.index.save(&self.index_path()).await
    }

    async fn persist(&self, index: &CacheIndex) {
        if let Err(e) = index.save(&self.index_path()).await {
            warn!(error = %e, "Failed to persist cache index");
        }
    }
}

/// Handle to a background preload
pub struct PreloadHandle {
    cancel: CancellationToken,
    task: JoinHandle<PrepareReport>,
}

impl PreloadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the preload; `None` if its task panicked
    pub async fn result(self) -> Option<PrepareReport> {
        self.task.await.ok()
    }
}

fn validate(desc: &AssetDescriptor, artifact: Artifact) -> Result<()> {
    if desc.id.trim().is_empty() {
        return Err(CacheError::InvalidRequest("asset id is empty".to_string()));
    }
    match source_url(desc, artifact) {
        Some(url) if !url.trim().is_empty() => Ok(()),
        _ => Err(CacheError::InvalidRequest(format!(
            "no {} url for asset {}",
            artifact_tag(artifact),
            desc.id
        ))),
    }
}

fn source_url(desc: &AssetDescriptor, artifact: Artifact) -> Option<&str> {
    match artifact {
        Artifact::Primary => Some(desc.url.as_str()),
        Artifact::Thumbnail => desc.thumbnail_url.as_deref(),
    }
}

fn artifact_tag(artifact: Artifact) -> &'static str {
    match artifact {
        Artifact::Primary => "primary",
        Artifact::Thumbnail => "thumbnail",
    }
}

async fn is_resident(file: &CachedFile) -> bool {
    matches!(fs::metadata(&file.path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove file");
        }
    }
}
