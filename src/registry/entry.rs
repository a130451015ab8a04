//! Registry entries: metadata, provenance and previews

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profiler::Profile;

/// Where an entry's bytes came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Provenance {
    /// Downloaded from `original_link` via `download_link` after `redirects` hops
    #[serde(rename_all = "camelCase")]
    Download {
        original_link: String,
        download_link: String,
        redirects: u32,
    },

    /// Extracted from entry `entry_name` of archive `archive_id`
    #[serde(rename_all = "camelCase")]
    Archive { archive_id: Uuid, entry_name: String },
}

/// A registered, classified blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: Uuid,
    pub filename: String,

    /// Opaque handle owned by the blob store
    #[serde(skip)]
    location: PathBuf,

    pub creation: DateTime<Utc>,
    pub profile: Profile,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Profile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Provenance>,
}

impl FileInfo {
    /// Build an entry from its classification. The first profile becomes the
    /// primary one; `None` when there is no profile at all.
    pub fn new(
        id: Uuid,
        filename: impl Into<String>,
        location: PathBuf,
        profiles: Vec<Profile>,
    ) -> Option<Self> {
        let mut profiles = profiles.into_iter();
        let profile = profiles.next()?;
        Some(Self {
            id,
            filename: filename.into(),
            location,
            creation: Utc::now(),
            profile,
            alternatives: profiles.collect(),
            source: None,
        })
    }

    pub fn with_source(mut self, source: Provenance) -> Self {
        self.source = Some(source);
        self
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Time since creation; zero if the clock went backwards
    pub fn age(&self) -> Duration {
        (Utc::now() - self.creation).to_std().unwrap_or_default()
    }

    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.age() > max_lifetime
    }
}

/// Leading part of an entry's content, decoded for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub content: String,

    /// The blob holds more than `content` shows
    pub incomplete: bool,
}

impl Preview {
    pub fn from_head(head: &[u8], total_size: u64) -> Self {
        Self {
            content: String::from_utf8_lossy(head).into_owned(),
            incomplete: total_size > head.len() as u64,
        }
    }
}
