//! Media download, storage and archive extraction
//!
//! - **MediaFetcher**: opens HTTP/HTTPS downloads, following redirects by hand
//!   with a fixed bound, cookie propagation between hops, and separate
//!   connect/read timeouts
//! - **BlobStore**: persistence contract keyed by entry id, with the
//!   filesystem implementation [`FsBlobStore`]
//! - **archive**: single-entry extraction from zip and tar blobs
//!
//! # Example
//!
//! ```ignore
//! use stowage::media::{FsBlobStore, MediaFetcher, StoreConfig, BlobStore};
//!
//! let fetcher = MediaFetcher::new();
//! let download = fetcher.open("https://example.com/corpus.zip").await?;
//! let redirects = download.redirects;
//!
//! let store = FsBlobStore::new(StoreConfig::default()).await?;
//! let mut reader = download.into_reader();
//! let location = store.save(uuid::Uuid::new_v4(), "corpus.zip", &mut reader).await?;
//! ```

pub mod archive;
pub mod fetch;
mod lock;
pub mod store;

pub use archive::{extract_entry, ArchiveError, ArchiveKind};
pub use fetch::{
    content_disposition_filename, Download, FetchConfig, FetchError, MediaFetcher,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS, MAX_ALLOWED_REDIRECTS,
};
pub use store::{
    sanitize_filename, BlobStore, FsBlobStore, StoreConfig, StoreError, DEFAULT_FILENAME,
    DEFAULT_MAX_FILE_SIZE,
};
