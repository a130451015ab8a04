//! Blob store
//!
//! Persists ingested byte streams under their entry id and hands back a
//! location. The registry owns the decision of when a blob goes away; the
//! store only does what it is told.
//!
//! [`FsBlobStore`] keeps every blob in its own directory,
//! `<base_dir>/run-<run id>/<uuid>/<sanitized filename>`, so distinct ids
//! never alias. The run directory belongs to one store instance and is
//! guarded by an advisory `RunLock`; several processes can share a
//! `base_dir` without touching each other's blobs.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::lock::RunLock;

/// Default maximum blob size (50MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Filename used when the supplied one sanitizes to nothing
pub const DEFAULT_FILENAME: &str = "file";

/// Maximum length of a stored filename in bytes
const MAX_FILENAME_LEN: usize = 255;

/// Copy buffer size
const CHUNK_SIZE: usize = 64 * 1024;

/// Prefix of per-instance run directories under the base directory
const RUN_DIR_PREFIX: &str = "run-";

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\x00-\x1f\x7f<>:"|?*]"#).expect("unsafe filename regex"));

/// Errors that can occur during blob store operations
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("File too large: more than {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("File not found: {0}")]
    NotFound(String),

    /// Reading the caller's source stream failed
    #[error("Source read error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Byte persistence keyed by entry id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist everything `source` yields. On error nothing is left behind.
    async fn save(
        &self,
        id: Uuid,
        filename: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<PathBuf, StoreError>;

    /// Remove a blob. Removing an absent blob is not an error.
    async fn delete(&self, id: Uuid, location: &Path) -> Result<(), StoreError>;

    /// Read a whole blob
    async fn read(&self, location: &Path) -> Result<Vec<u8>, StoreError>;

    /// Read at most `max` leading bytes, together with the full blob size
    async fn read_head(&self, location: &Path, max: usize) -> Result<(Vec<u8>, u64), StoreError>;

    /// Overwrite a blob in place
    async fn replace(&self, location: &Path, content: &[u8]) -> Result<(), StoreError>;
}

/// Configuration for the filesystem blob store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory for storing blobs
    pub base_dir: PathBuf,

    /// Maximum blob size in bytes
    pub max_file_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("stowage"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Create config with custom base directory
    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// Create config with custom max file size
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

/// Filesystem-backed [`BlobStore`]
#[derive(Debug)]
pub struct FsBlobStore {
    config: StoreConfig,
    run_dir: PathBuf,
    _lock: RunLock,
}

impl FsBlobStore {
    /// Create the store with a fresh run directory under the base directory.
    ///
    /// Run directories whose owning store is gone are removed: the registry
    /// is in-memory, so nothing can refer to their blobs any more. Run
    /// directories of live stores are left alone.
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create base directory: {}", e)))?;

        // Lock before the directory exists so a concurrent purge never sees
        // it unowned.
        let run_dir = config
            .base_dir
            .join(format!("{}{}", RUN_DIR_PREFIX, Uuid::new_v4()));
        let lock = RunLock::try_acquire(&run_dir)
            .map_err(|e| StoreError::Io(format!("Failed to lock run directory: {}", e)))?
            .ok_or_else(|| {
                StoreError::Io(format!("Run directory {} is locked", run_dir.display()))
            })?;
        fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create run directory: {}", e)))?;

        let store = Self {
            config,
            run_dir,
            _lock: lock,
        };
        let purged = store.purge_stale_runs().await?;
        if purged > 0 {
            tracing::info!(count = purged, "Removed blobs of finished runs");
        }
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory holding this instance's blobs
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn blob_dir(&self, id: Uuid) -> PathBuf {
        self.run_dir.join(id.to_string())
    }

    /// Remove run directories (and their lock files) that no live store owns
    async fn purge_stale_runs(&self) -> Result<usize, StoreError> {
        let mut dir = fs::read_dir(&self.config.base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read base directory: {}", e)))?;

        let mut runs = std::collections::BTreeSet::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read directory entry: {}", e)))?
        {
            let name = entry.file_name();
            let Some(run) = name.to_str().and_then(run_dir_name) else {
                continue;
            };
            let path = self.config.base_dir.join(run);
            if path != self.run_dir {
                runs.insert(path);
            }
        }

        let mut purged = 0;
        for path in runs {
            let lock = match RunLock::try_acquire(&path) {
                Ok(Some(lock)) => lock,
                Ok(None) => {
                    tracing::debug!(path = %path.display(), "Run directory in use, keeping it");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to lock run directory");
                    continue;
                }
            };
            match fs::remove_dir_all(&path).await {
                Ok(()) => purged += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove stale run directory"
                    );
                    continue;
                }
            }
            if let Err(e) = fs::remove_file(lock.path()).await {
                tracing::debug!(path = %lock.path().display(), error = %e, "Failed to remove lock file");
            }
        }
        Ok(purged)
    }

    async fn copy_limited(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &Path,
    ) -> Result<u64, StoreError> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create file: {}", e)))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| StoreError::Source(e.to_string()))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > self.config.max_file_size {
                return Err(StoreError::FileTooLarge {
                    max: self.config.max_file_size,
                });
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| StoreError::Io(format!("Failed to write file: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write file: {}", e)))?;
        Ok(written)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(
        &self,
        id: Uuid,
        filename: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<PathBuf, StoreError> {
        let dir = self.blob_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create blob directory: {}", e)))?;

        let mut name = sanitize_filename(filename);
        if name.is_empty() {
            name = DEFAULT_FILENAME.to_string();
        }
        let path = dir.join(name);

        match self.copy_limited(source, &path).await {
            Ok(size) => {
                tracing::debug!(
                    id = %id,
                    path = %path.display(),
                    size = size,
                    "Stored blob"
                );
                Ok(path)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir).await {
                    tracing::warn!(
                        id = %id,
                        error = %cleanup,
                        "Failed to remove partially written blob"
                    );
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, id: Uuid, location: &Path) -> Result<(), StoreError> {
        let dir = self.blob_dir(id);
        if !location.starts_with(&dir) {
            return Err(StoreError::Io(format!(
                "{} does not belong to blob {}",
                location.display(),
                id
            )));
        }
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(id = %id, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("Failed to remove blob: {}", e))),
        }
    }

    async fn read(&self, location: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(location).await.map_err(|e| io_error(location, e))
    }

    async fn read_head(&self, location: &Path, max: usize) -> Result<(Vec<u8>, u64), StoreError> {
        let file = fs::File::open(location)
            .await
            .map_err(|e| io_error(location, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(location, e))?
            .len();
        let mut head = Vec::with_capacity(max.min(CHUNK_SIZE));
        file.take(max as u64)
            .read_to_end(&mut head)
            .await
            .map_err(|e| io_error(location, e))?;
        Ok((head, size))
    }

    async fn replace(&self, location: &Path, content: &[u8]) -> Result<(), StoreError> {
        if content.len() as u64 > self.config.max_file_size {
            return Err(StoreError::FileTooLarge {
                max: self.config.max_file_size,
            });
        }
        if !fs::try_exists(location).await.unwrap_or(false) {
            return Err(StoreError::NotFound(location.display().to_string()));
        }
        fs::write(location, content)
            .await
            .map_err(|e| io_error(location, e))
    }
}

fn io_error(location: &Path, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(location.display().to_string())
    } else {
        StoreError::Io(format!("{}: {}", location.display(), e))
    }
}

/// `run-<uuid>` for a run directory or its lock file, `None` for anything else
fn run_dir_name(name: &str) -> Option<&str> {
    let run = name.strip_suffix(".lock").unwrap_or(name);
    let id = run.strip_prefix(RUN_DIR_PREFIX)?;
    Uuid::parse_str(id).ok().map(|_| run)
}

/// Make a user-supplied filename safe to use as a single path component.
///
/// Directory parts are dropped, control and reserved characters removed,
/// surrounding whitespace and leading dots trimmed, and the result capped at
/// 255 bytes. May return an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "");
    let trimmed = cleaned.trim().trim_start_matches('.').trim();

    let mut end = trimmed.len().min(MAX_FILENAME_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
