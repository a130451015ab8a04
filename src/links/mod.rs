//! Link resolution
//!
//! Turns a user-supplied identifier into an initial download URL:
//!
//! - `http://` and `https://` URLs are used as-is
//! - DOIs (`doi:10.1000/182`, `10.1000/182`) go through the doi.org proxy
//! - Handles (`hdl:11372/LRT-1234`, `11372/LRT-1234`) go through the
//!   hdl.handle.net proxy
//!
//! The proxies answer with redirects, which the media fetcher follows.
//!
//! # Example
//!
//! ```
//! use stowage::links::{DefaultLinkResolver, LinkResolver};
//!
//! let info = DefaultLinkResolver::new().resolve("doi:10.1000/182").unwrap();
//! assert_eq!(info.download_link, "https://doi.org/10.1000/182");
//! assert_eq!(info.filename, "182");
//! ```

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use thiserror::Error;
use url::Url;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default DOI proxy
pub const DEFAULT_DOI_PROXY: &str = "https://doi.org/";

/// Default handle proxy
pub const DEFAULT_HANDLE_PROXY: &str = "https://hdl.handle.net/";

static DOI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").expect("doi regex"));
static HANDLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*/\S+$").expect("handle regex"));

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while resolving an identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("empty identifier")]
    Empty,

    #[error("not a URL, DOI or handle: {0}")]
    Unrecognized(String),
}

// ---------------------------------------------------------------------------
// LinkInfo
// ---------------------------------------------------------------------------

/// Result of resolving an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// The identifier as given by the caller (trimmed)
    pub original: String,

    /// First URL to download from; may redirect further
    pub download_link: String,

    /// Suggested filename, before any server-provided override
    pub filename: String,
}

/// Maps identifiers to download URLs
pub trait LinkResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<LinkInfo, LinkError>;
}

// ---------------------------------------------------------------------------
// DefaultLinkResolver
// ---------------------------------------------------------------------------

/// Resolver for plain URLs, DOIs and handles
#[derive(Debug, Clone)]
pub struct DefaultLinkResolver {
    doi_proxy: String,
    handle_proxy: String,
}

impl Default for DefaultLinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultLinkResolver {
    pub fn new() -> Self {
        Self {
            doi_proxy: DEFAULT_DOI_PROXY.to_string(),
            handle_proxy: DEFAULT_HANDLE_PROXY.to_string(),
        }
    }

    /// Use a different DOI proxy (must end with `/`)
    pub fn with_doi_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.doi_proxy = proxy.into();
        self
    }

    /// Use a different handle proxy (must end with `/`)
    pub fn with_handle_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.handle_proxy = proxy.into();
        self
    }

    fn download_link(&self, identifier: &str) -> Option<String> {
        if let Some(doi) = strip_prefix_ignore_case(identifier, "doi:") {
            let doi = doi.trim();
            return DOI_REGEX
                .is_match(doi)
                .then(|| format!("{}{}", self.doi_proxy, doi));
        }
        if let Some(handle) = strip_prefix_ignore_case(identifier, "hdl:") {
            let handle = handle.trim();
            return HANDLE_REGEX
                .is_match(handle)
                .then(|| format!("{}{}", self.handle_proxy, handle));
        }
        if let Ok(url) = Url::parse(identifier) {
            return matches!(url.scheme(), "http" | "https").then(|| identifier.to_string());
        }
        if DOI_REGEX.is_match(identifier) {
            return Some(format!("{}{}", self.doi_proxy, identifier));
        }
        if HANDLE_REGEX.is_match(identifier) {
            return Some(format!("{}{}", self.handle_proxy, identifier));
        }
        None
    }
}

impl LinkResolver for DefaultLinkResolver {
    fn resolve(&self, identifier: &str) -> Result<LinkInfo, LinkError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(LinkError::Empty);
        }

        let download_link = self
            .download_link(identifier)
            .ok_or_else(|| LinkError::Unrecognized(identifier.to_string()))?;
        let filename = filename_from_link(&download_link);

        Ok(LinkInfo {
            original: identifier.to_string(),
            download_link,
            filename,
        })
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

/// Last non-empty path segment of a URL, percent-decoded; the host otherwise.
pub fn filename_from_link(link: &str) -> String {
    let Ok(url) = Url::parse(link) else {
        return String::new();
    };
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_default()
}
