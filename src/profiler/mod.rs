//! Content profiling
//!
//! A [`Profiler`] looks at a persisted blob and returns an ordered list of
//! [`Profile`]s: the first one is the primary classification, the rest are
//! alternates. The registry treats an empty list as a failure.
//!
//! [`BasicProfiler`] is a small magic-byte sniffer used when no external
//! profiler is plugged in. It recognises common archive, document and image
//! signatures, XML/JSON documents and plain UTF-8 text, and falls back to the
//! file extension.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub const MEDIATYPE_TEXT: &str = "text/plain";
pub const MEDIATYPE_XML: &str = "text/xml";
pub const MEDIATYPE_JSON: &str = "application/json";
pub const MEDIATYPE_ZIP: &str = "application/zip";
pub const MEDIATYPE_TAR: &str = "application/x-tar";
pub const MEDIATYPE_GZIP: &str = "application/gzip";
pub const MEDIATYPE_PDF: &str = "application/pdf";
pub const MEDIATYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Number of leading bytes inspected by [`BasicProfiler`] (64KB)
pub const DEFAULT_SAMPLE_SIZE: usize = 64 * 1024;

/// Errors produced while profiling a blob
#[derive(Error, Debug, Clone)]
pub enum ProfilingError {
    #[error("empty profiling result")]
    Empty,

    #[error("IO error: {0}")]
    Io(String),

    #[error("profiling failed: {0}")]
    Failed(String),
}

/// A single content classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub media_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            features: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.features.insert(key.into(), value.into());
        self
    }

    /// Media type without parameters, lowercased (`Text/Plain; charset=x` -> `text/plain`)
    pub fn essence(&self) -> String {
        media_type_essence(&self.media_type)
    }

    /// Compare against a media type, ignoring case and parameters
    pub fn is_media_type(&self, media_type: &str) -> bool {
        self.essence() == media_type_essence(media_type)
    }

    /// Whether the content is in the `text/*` family
    pub fn is_text(&self) -> bool {
        self.essence().starts_with("text/")
    }
}

fn media_type_essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Classifies persisted blobs
#[async_trait]
pub trait Profiler: Send + Sync {
    /// Profile the blob at `location`. The first profile is the primary one.
    async fn profile(&self, location: &Path) -> Result<Vec<Profile>, ProfilingError>;
}

/// Signature-based profiler used when nothing better is configured
#[derive(Debug, Clone)]
pub struct BasicProfiler {
    sample_size: usize,
}

impl Default for BasicProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicProfiler {
    pub fn new() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(512);
        self
    }

    async fn read_sample(&self, location: &Path) -> Result<(Vec<u8>, bool), ProfilingError> {
        let file = tokio::fs::File::open(location)
            .await
            .map_err(|e| ProfilingError::Io(format!("{}: {}", location.display(), e)))?;
        let mut sample = Vec::with_capacity(self.sample_size.min(8192));
        let read = file
            .take(self.sample_size as u64 + 1)
            .read_to_end(&mut sample)
            .await
            .map_err(|e| ProfilingError::Io(format!("{}: {}", location.display(), e)))?;
        let truncated = read > self.sample_size;
        sample.truncate(self.sample_size);
        Ok((sample, truncated))
    }
}

#[async_trait]
impl Profiler for BasicProfiler {
    async fn profile(&self, location: &Path) -> Result<Vec<Profile>, ProfilingError> {
        let (sample, truncated) = self.read_sample(location).await?;
        let by_extension = location
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(extension_to_media_type);

        let mut profiles = sniff(&sample, truncated);
        if let Some(media_type) = by_extension {
            if !profiles.iter().any(|p| p.is_media_type(media_type)) {
                profiles.push(Profile::new(media_type));
            }
        }

        tracing::debug!(
            path = %location.display(),
            primary = %profiles[0].media_type,
            alternates = profiles.len() - 1,
            "Profiled blob"
        );
        Ok(profiles)
    }
}

/// Classify a content sample. Always returns at least one profile.
fn sniff(sample: &[u8], truncated: bool) -> Vec<Profile> {
    if sample.starts_with(b"%PDF-") {
        return vec![Profile::new(MEDIATYPE_PDF)];
    }
    if sample.starts_with(b"PK\x03\x04") || sample.starts_with(b"PK\x05\x06") {
        return vec![Profile::new(MEDIATYPE_ZIP)];
    }
    if sample.starts_with(&[0x1f, 0x8b]) {
        return vec![Profile::new(MEDIATYPE_GZIP)];
    }
    if sample.len() >= 262 && &sample[257..262] == b"ustar" {
        return vec![Profile::new(MEDIATYPE_TAR)];
    }
    if sample.starts_with(b"\x89PNG\r\n\x1a\n") {
        return vec![Profile::new("image/png")];
    }
    if sample.starts_with(&[0xff, 0xd8, 0xff]) {
        return vec![Profile::new("image/jpeg")];
    }
    if sample.starts_with(b"GIF87a") || sample.starts_with(b"GIF89a") {
        return vec![Profile::new("image/gif")];
    }

    let text = match decode_text_sample(sample, truncated) {
        Some(text) => text,
        None => return vec![Profile::new(MEDIATYPE_OCTET_STREAM)],
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with("<?xml") {
        return vec![
            Profile::new(MEDIATYPE_XML),
            Profile::new(MEDIATYPE_TEXT).with_feature("charset", "utf-8"),
        ];
    }
    if !truncated
        && (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return vec![
            Profile::new(MEDIATYPE_JSON),
            Profile::new(MEDIATYPE_TEXT).with_feature("charset", "utf-8"),
        ];
    }

    vec![Profile::new(MEDIATYPE_TEXT).with_feature("charset", "utf-8")]
}

/// Decode a sample as UTF-8 text, tolerating a multi-byte sequence cut off by
/// the sample boundary. Control characters other than whitespace disqualify it.
fn decode_text_sample(sample: &[u8], truncated: bool) -> Option<&str> {
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        Err(e) if truncated && e.error_len().is_none() => {
            std::str::from_utf8(&sample[..e.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };
    let binary = text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{c}'));
    (!binary).then_some(text)
}

fn extension_to_media_type(extension: &str) -> Option<&'static str> {
    let media_type = match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" => MEDIATYPE_TEXT,
        "xml" => MEDIATYPE_XML,
        "json" => MEDIATYPE_JSON,
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "pdf" => MEDIATYPE_PDF,
        "zip" => MEDIATYPE_ZIP,
        "tar" => MEDIATYPE_TAR,
        "gz" | "tgz" => MEDIATYPE_GZIP,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(media_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn profile_bytes(name: &str, bytes: &[u8]) -> Vec<Profile> {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        BasicProfiler::new().profile(&path).await.unwrap()
    }

    #[test]
    fn test_profile_media_type_comparison() {
        let profile = Profile::new("Text/Plain; charset=utf-8");
        assert!(profile.is_media_type("text/plain"));
        assert!(profile.is_text());
        assert_eq!(profile.essence(), "text/plain");
        assert!(!Profile::new(MEDIATYPE_ZIP).is_text());
    }

    #[test]
    fn test_profile_serializes_camel_case() {
        let profile = Profile::new(MEDIATYPE_TEXT).with_feature("charset", "utf-8");
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["mediaType"], "text/plain");
        assert_eq!(json["features"]["charset"], "utf-8");

        let bare = serde_json::to_value(Profile::new(MEDIATYPE_PDF)).unwrap();
        assert!(bare.get("features").is_none());
    }

    #[tokio::test]
    async fn test_plain_text() {
        let profiles = profile_bytes("a.txt", b"hello").await;
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0].is_media_type(MEDIATYPE_TEXT));
    }

    #[tokio::test]
    async fn test_xml_has_text_alternate() {
        let profiles = profile_bytes("doc", b"<?xml version=\"1.0\"?><a/>").await;
        assert!(profiles[0].is_media_type(MEDIATYPE_XML));
        assert!(profiles[1].is_media_type(MEDIATYPE_TEXT));
    }

    #[tokio::test]
    async fn test_json_detected() {
        let profiles = profile_bytes("data", br#"{"a": [1, 2]}"#).await;
        assert!(profiles[0].is_media_type(MEDIATYPE_JSON));
    }

    #[tokio::test]
    async fn test_zip_signature_wins_over_extension() {
        let profiles = profile_bytes("notes.txt", b"PK\x03\x04rest-of-zip").await;
        assert!(profiles[0].is_media_type(MEDIATYPE_ZIP));
        assert!(profiles[1].is_media_type(MEDIATYPE_TEXT));
    }

    #[tokio::test]
    async fn test_binary_falls_back_to_octet_stream() {
        let profiles = profile_bytes("blob", &[0u8, 1, 2, 3, 0xfe]).await;
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0].is_media_type(MEDIATYPE_OCTET_STREAM));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = BasicProfiler::new()
            .profile(&dir.path().join("missing"))
            .await;
        assert!(matches!(result, Err(ProfilingError::Io(_))));
    }

    #[test]
    fn test_truncated_utf8_sample_is_still_text() {
        let sample = "héllo".as_bytes();
        // cut in the middle of the two-byte 'é'
        assert!(decode_text_sample(&sample[..2], true).is_some());
        assert!(decode_text_sample(&sample[..2], false).is_none());
    }
}
