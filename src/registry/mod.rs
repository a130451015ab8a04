//! Media registry
//!
//! The in-memory index of every stored entry, and the ingest pipeline that
//! feeds it. An ingest run goes through:
//!
//! 1. persist the byte stream in the blob store under a fresh id
//! 2. classify the persisted blob
//! 3. check the primary profile against the retention policy
//! 4. insert the entry, which makes it visible
//!
//! A failure after step 1 deletes the blob again, so a failed run leaves
//! neither an entry nor a blob behind. Each run executes on its own tokio
//! task: dropping the caller's future does not interrupt a run half-way.
//!
//! A background sweep evicts entries older than the policy's maximum
//! lifetime. It stops on [`MediaRegistry::shutdown`] or when the last
//! handle to the registry is dropped.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stowage::media::{FsBlobStore, StoreConfig};
//! use stowage::policy::StoragePolicy;
//! use stowage::profiler::BasicProfiler;
//! use stowage::registry::MediaRegistry;
//!
//! let store = FsBlobStore::new(StoreConfig::default()).await?;
//! let registry = MediaRegistry::builder(
//!     Arc::new(store),
//!     Arc::new(BasicProfiler::new()),
//!     Arc::new(StoragePolicy::default()),
//! )
//! .build();
//!
//! let info = registry.add_media("notes.txt", &b"hello"[..]).await?;
//! assert_eq!(registry.read_content(info.id).await?, b"hello");
//! ```

mod entry;
mod error;
mod sweep;

pub use entry::{FileInfo, Preview, Provenance};
pub use error::RegistryError;
pub use sweep::MIN_SWEEP_PERIOD;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::defaults::DEFAULT_MAX_INLINE_BYTES;
use crate::config::StowageConfig;
use crate::links::{DefaultLinkResolver, LinkResolver};
use crate::media::{
    extract_entry, sanitize_filename, ArchiveError, ArchiveKind, BlobStore, FetchConfig,
    FetchError, FsBlobStore, MediaFetcher, StoreError, DEFAULT_FILENAME,
};
use crate::policy::RetentionPolicy;
use crate::profiler::{BasicProfiler, Profile, Profiler, ProfilingError};

/// Default size cap for a single extracted archive entry (50MB)
pub const DEFAULT_MAX_ARCHIVE_ENTRY_SIZE: u64 = 50 * 1024 * 1024;

type Source = Box<dyn AsyncRead + Send + Unpin>;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`MediaRegistry`] from its collaborators
pub struct RegistryBuilder {
    store: Arc<dyn BlobStore>,
    profiler: Arc<dyn Profiler>,
    policy: Arc<dyn RetentionPolicy>,
    resolver: Arc<dyn LinkResolver>,
    fetch_config: FetchConfig,
    preview_limit: usize,
    max_archive_entry_size: u64,
}

impl RegistryBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn fetch_config(mut self, config: FetchConfig) -> Self {
        self.fetch_config = config;
        self
    }

    /// Number of leading bytes kept in a preview
    pub fn preview_limit(mut self, bytes: usize) -> Self {
        self.preview_limit = bytes;
        self
    }

    pub fn max_archive_entry_size(mut self, bytes: u64) -> Self {
        self.max_archive_entry_size = bytes;
        self
    }

    /// Build the registry and start its eviction sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> MediaRegistry {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = self.policy.cleanup_period();

        let inner = Arc::new(RegistryInner {
            entries: RwLock::new(HashMap::new()),
            previews: RwLock::new(PreviewCache::default()),
            store: self.store,
            profiler: self.profiler,
            policy: self.policy,
            resolver: self.resolver,
            fetcher: MediaFetcher::with_config(self.fetch_config),
            preview_limit: self.preview_limit,
            max_archive_entry_size: self.max_archive_entry_size,
            shutdown_tx,
            sweep_task: Mutex::new(None),
        });

        let task = tokio::spawn(sweep::sweep_loop(
            Arc::downgrade(&inner),
            period,
            shutdown_rx,
        ));
        *inner.sweep_task.lock() = Some(task);

        MediaRegistry { inner }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent registry of stored media entries. Cheap to clone.
#[derive(Clone)]
pub struct MediaRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    entries: RwLock<HashMap<Uuid, FileInfo>>,
    previews: RwLock<PreviewCache>,
    store: Arc<dyn BlobStore>,
    profiler: Arc<dyn Profiler>,
    policy: Arc<dyn RetentionPolicy>,
    resolver: Arc<dyn LinkResolver>,
    fetcher: MediaFetcher,
    preview_limit: usize,
    max_archive_entry_size: u64,
    shutdown_tx: watch::Sender<bool>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cached previews plus a content revision per entry.
///
/// Every content change bumps the revision; a preview computed from an older
/// revision is never cached.
#[derive(Default)]
struct PreviewCache {
    previews: HashMap<Uuid, Preview>,
    revisions: HashMap<Uuid, u64>,
}

impl PreviewCache {
    fn revision(&self, id: Uuid) -> u64 {
        self.revisions.get(&id).copied().unwrap_or(0)
    }

    /// Drop the preview and move to a new revision
    fn invalidate(&mut self, id: Uuid) {
        self.previews.remove(&id);
        let revision = self.revisions.entry(id).or_insert(0);
        *revision = revision.wrapping_add(1);
    }

    /// Drop all state for a removed entry
    fn forget(&mut self, id: Uuid) {
        self.previews.remove(&id);
        self.revisions.remove(&id);
    }
}

/// What the pipeline knows about a byte stream besides its name
#[derive(Default)]
struct Origin {
    profile_override: Option<Profile>,
    provenance: Option<Provenance>,
    /// Set for downloads; source read failures become data stream errors
    download_url: Option<String>,
}

impl MediaRegistry {
    /// Start building a registry around the three required collaborators
    pub fn builder(
        store: Arc<dyn BlobStore>,
        profiler: Arc<dyn Profiler>,
        policy: Arc<dyn RetentionPolicy>,
    ) -> RegistryBuilder {
        RegistryBuilder {
            store,
            profiler,
            policy,
            resolver: Arc::new(DefaultLinkResolver::new()),
            fetch_config: FetchConfig::default(),
            preview_limit: DEFAULT_MAX_INLINE_BYTES,
            max_archive_entry_size: DEFAULT_MAX_ARCHIVE_ENTRY_SIZE,
        }
    }

    /// Registry with the filesystem store, the signature profiler and the
    /// allow-list policy, all configured from `config`.
    pub async fn from_config(config: &StowageConfig) -> Result<Self, RegistryError> {
        let store = FsBlobStore::new(config.storage.store_config()).await?;
        Ok(Self::builder(
            Arc::new(store),
            Arc::new(BasicProfiler::new()),
            Arc::new(config.retention.policy()),
        )
        .fetch_config(config.download.fetch_config())
        .preview_limit(config.preview.max_inline_bytes)
        .max_archive_entry_size(config.storage.max_file_size)
        .build())
    }

    /// Ingest an uploaded byte stream
    pub async fn add_media<R>(&self, filename: &str, reader: R) -> Result<FileInfo, RegistryError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let inner = self.inner.clone();
        let filename = filename.to_string();
        run_detached(async move {
            inner
                .ingest(filename, Box::new(reader), Origin::default())
                .await
        })
        .await
    }

    /// Resolve `identifier` (URL, DOI or handle), download it and ingest the
    /// body. A given `profile_override` becomes the primary profile.
    pub async fn add_by_url(
        &self,
        identifier: &str,
        profile_override: Option<Profile>,
    ) -> Result<FileInfo, RegistryError> {
        let link = self.inner.resolver.resolve(identifier)?;
        debug!(
            identifier = %link.original,
            download_link = %link.download_link,
            "Resolved identifier"
        );

        let inner = self.inner.clone();
        run_detached(async move {
            let download = inner.fetcher.open(&link.download_link).await?;
            let filename = download
                .disposition_filename
                .clone()
                .unwrap_or_else(|| link.filename.clone());
            let origin = Origin {
                profile_override,
                provenance: Some(Provenance::Download {
                    original_link: link.original,
                    download_link: link.download_link,
                    redirects: download.redirects,
                }),
                download_url: Some(download.final_url.to_string()),
            };
            inner
                .ingest(filename, Box::new(download.into_reader()), origin)
                .await
        })
        .await
    }

    /// Ingest entry `entry_name` of the archive stored as `parent_id`
    pub async fn add_from_archive(
        &self,
        parent_id: Uuid,
        entry_name: &str,
        profile_override: Option<Profile>,
    ) -> Result<FileInfo, RegistryError> {
        let parent = self.get(parent_id).ok_or(RegistryError::NotFound(parent_id))?;
        let kind = ArchiveKind::from_profile(&parent.profile)
            .ok_or_else(|| ArchiveError::Unsupported(parent.profile.media_type.clone()))?;

        let inner = self.inner.clone();
        let entry_name = entry_name.to_string();
        run_detached(async move {
            let location = parent.location().to_path_buf();
            let name = entry_name.clone();
            let max = inner.max_archive_entry_size;
            let data = tokio::task::spawn_blocking(move || {
                extract_entry(&location, kind, &name, max)
            })
            .await
            .map_err(|e| RegistryError::Aborted(e.to_string()))??;

            let filename = entry_name
                .rsplit(['/', '\\'])
                .find(|part| !part.is_empty())
                .unwrap_or(entry_name.as_str())
                .to_string();
            let origin = Origin {
                profile_override,
                provenance: Some(Provenance::Archive {
                    archive_id: parent_id,
                    entry_name,
                }),
                download_url: None,
            };
            inner
                .ingest(filename, Box::new(std::io::Cursor::new(data)), origin)
                .await
        })
        .await
    }

    /// Look up an entry; `None` when unknown
    pub fn get(&self, id: Uuid) -> Option<FileInfo> {
        self.inner.entries.read().get(&id).cloned()
    }

    /// Replace the content of a text entry. Filename, id and creation time
    /// stay the same.
    pub async fn set_content(&self, id: Uuid, content: &[u8]) -> Result<(), RegistryError> {
        let info = self.get(id).ok_or(RegistryError::NotFound(id))?;
        if !info.profile.is_text() {
            return Err(RegistryError::NotEditable(info.profile.media_type));
        }

        let replaced = self.inner.store.replace(info.location(), content).await;
        // A failed replace may still have touched the blob
        self.inner.previews.write().invalidate(id);
        replaced?;
        debug!(id = %id, size = content.len(), "Replaced entry content");
        Ok(())
    }

    /// Remove an entry and its blob. Returns `false` when the id is unknown.
    pub async fn remove(&self, id: Uuid) -> bool {
        let Some(info) = self.inner.entries.write().remove(&id) else {
            return false;
        };
        self.inner.previews.write().forget(id);
        self.inner.discard_blob(id, info.location()).await;
        debug!(id = %id, "Removed entry");
        true
    }

    /// Full content of an entry
    pub async fn read_content(&self, id: Uuid) -> Result<Vec<u8>, RegistryError> {
        let info = self.get(id).ok_or(RegistryError::NotFound(id))?;
        Ok(self.inner.store.read(info.location()).await?)
    }

    /// Leading part of an entry's content, cached until the content changes
    pub async fn preview(&self, id: Uuid) -> Result<Preview, RegistryError> {
        let revision = {
            let cache = self.inner.previews.read();
            if let Some(preview) = cache.previews.get(&id) {
                return Ok(preview.clone());
            }
            cache.revision(id)
        };

        let info = self.get(id).ok_or(RegistryError::NotFound(id))?;
        let (head, size) = self
            .inner
            .store
            .read_head(info.location(), self.inner.preview_limit)
            .await?;
        let preview = Preview::from_head(&head, size);

        // Cache only if the content did not change while reading and the
        // entry is still registered. Removal and eviction take the entry out
        // before they clear the cache, so checking under this lock suffices.
        let mut cache = self.inner.previews.write();
        if cache.revision(id) == revision && self.inner.entries.read().contains_key(&id) {
            cache.previews.insert(id, preview.clone());
        }
        Ok(preview)
    }

    /// Snapshot of all entries, oldest first
    pub fn list(&self) -> Vec<FileInfo> {
        let mut entries: Vec<FileInfo> = self.inner.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.creation.cmp(&b.creation).then(a.id.cmp(&b.id)));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Run one eviction pass now; returns the number of evicted entries
    pub async fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired().await
    }

    /// Stop the eviction sweep and wait for it to finish
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let task = self.inner.sweep_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Eviction sweep task failed");
            }
        }
    }
}

impl std::fmt::Debug for MediaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRegistry")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Run an ingest on its own task so that it completes even if the caller
/// stops waiting.
async fn run_detached<F>(run: F) -> Result<FileInfo, RegistryError>
where
    F: Future<Output = Result<FileInfo, RegistryError>> + Send + 'static,
{
    tokio::spawn(run)
        .await
        .map_err(|e| RegistryError::Aborted(e.to_string()))?
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

impl RegistryInner {
    async fn ingest(
        &self,
        filename: String,
        mut source: Source,
        origin: Origin,
    ) -> Result<FileInfo, RegistryError> {
        let id = Uuid::new_v4();
        let mut display_name = sanitize_filename(&filename);
        if display_name.is_empty() {
            display_name = DEFAULT_FILENAME.to_string();
        }

        let location = match self.store.save(id, &display_name, &mut source).await {
            Ok(location) => location,
            Err(StoreError::Source(reason)) if origin.download_url.is_some() => {
                let url = origin.download_url.unwrap_or_default();
                return Err(FetchError::DataStream { url, reason }.into());
            }
            Err(e) => return Err(e.into()),
        };

        match self.admit(id, display_name, location.clone(), origin).await {
            Ok(info) => {
                info!(
                    id = %info.id,
                    filename = %info.filename,
                    media_type = %info.profile.media_type,
                    "Stored entry"
                );
                Ok(info)
            }
            Err(e) => {
                debug!(id = %id, error = %e, "Ingest failed, discarding blob");
                self.discard_blob(id, &location).await;
                Err(e)
            }
        }
    }

    /// Classify, check policy, then insert. Nothing is visible unless every
    /// step succeeds.
    async fn admit(
        &self,
        id: Uuid,
        filename: String,
        location: PathBuf,
        origin: Origin,
    ) -> Result<FileInfo, RegistryError> {
        let classified = self.profiler.profile(&location).await?;
        if classified.is_empty() {
            return Err(ProfilingError::Empty.into());
        }

        let profiles = match origin.profile_override {
            Some(primary) => {
                let mut profiles = vec![primary];
                for profile in classified {
                    if !profiles.contains(&profile) {
                        profiles.push(profile);
                    }
                }
                profiles
            }
            None => classified,
        };

        let mut info =
            FileInfo::new(id, filename, location, profiles).ok_or(ProfilingError::Empty)?;
        if let Some(provenance) = origin.provenance {
            info = info.with_source(provenance);
        }

        self.policy.accept_profile(&info.profile)?;

        self.entries.write().insert(id, info.clone());
        Ok(info)
    }

    /// Best-effort blob deletion; failures are logged
    async fn discard_blob(&self, id: Uuid, location: &std::path::Path) {
        if let Err(e) = self.store.delete(id, location).await {
            warn!(id = %id, error = %e, "Failed to delete blob");
        }
    }

    pub(crate) async fn sweep_expired(&self) -> usize {
        let max_lifetime = self.policy.max_allowed_lifetime();

        let mut expired = Vec::new();
        self.entries.write().retain(|_, info| {
            if info.is_expired(max_lifetime) {
                expired.push(info.clone());
                false
            } else {
                true
            }
        });

        if expired.is_empty() {
            return 0;
        }

        {
            let mut previews = self.previews.write();
            for info in &expired {
                previews.forget(info.id);
            }
        }

        for info in &expired {
            debug!(id = %info.id, filename = %info.filename, "Evicting expired entry");
            self.discard_blob(info.id, info.location()).await;
        }
        expired.len()
    }
}
