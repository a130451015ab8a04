//! Retention policy
//!
//! Decides which classified entries may be kept and for how long.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::profiler::Profile;

/// Default maximum lifetime of a stored entry (1 hour)
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 3600;

/// Default interval between eviction sweeps (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Reasons for refusing to keep an entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("media type not allowed: {0}")]
    MediaTypeNotAllowed(String),

    #[error("{0}")]
    Rejected(String),
}

/// Acceptance rules and eviction timing consumed by the registry
pub trait RetentionPolicy: Send + Sync {
    /// Accept or reject an entry by its primary profile
    fn accept_profile(&self, profile: &Profile) -> Result<(), PolicyError>;

    /// Entries older than this are evicted by the sweep
    fn max_allowed_lifetime(&self) -> Duration;

    /// Interval between eviction sweeps
    fn cleanup_period(&self) -> Duration;
}

/// Allow-list based policy with fixed lifetimes
///
/// An empty allow-list accepts every media type.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    allowed_media_types: BTreeSet<String>,
    max_lifetime: Duration,
    cleanup_period: Duration,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            allowed_media_types: BTreeSet::new(),
            max_lifetime: Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS),
            cleanup_period: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl StoragePolicy {
    /// Restrict accepted entries to the given media types
    pub fn with_allowed_media_types<I, S>(mut self, media_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_media_types = media_types
            .into_iter()
            .map(|m| Profile::new(m.as_ref()).essence())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_cleanup_period(mut self, cleanup_period: Duration) -> Self {
        self.cleanup_period = cleanup_period;
        self
    }

    pub fn allowed_media_types(&self) -> &BTreeSet<String> {
        &self.allowed_media_types
    }
}

impl RetentionPolicy for StoragePolicy {
    fn accept_profile(&self, profile: &Profile) -> Result<(), PolicyError> {
        if self.allowed_media_types.is_empty()
            || self.allowed_media_types.contains(&profile.essence())
        {
            return Ok(());
        }
        Err(PolicyError::MediaTypeNotAllowed(profile.media_type.clone()))
    }

    fn max_allowed_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    fn cleanup_period(&self) -> Duration {
        self.cleanup_period
    }
}
