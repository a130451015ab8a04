//! Error taxonomy for registry operations

use thiserror::Error;
use uuid::Uuid;

use crate::links::LinkError;
use crate::media::{ArchiveError, FetchError, StoreError};
use crate::policy::PolicyError;
use crate::profiler::ProfilingError;

/// Everything an ingest or entry operation can fail with
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("bad identifier: {0}")]
    BadIdentifier(#[from] LinkError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("classification failed: {0}")]
    Classification(ProfilingError),

    #[error("rejected by policy: {0}")]
    PolicyRejected(#[from] PolicyError),

    #[error("no such entry: {0}")]
    NotFound(Uuid),

    #[error("content of {0} entries cannot be replaced")]
    NotEditable(String),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("ingest task aborted: {0}")]
    Aborted(String),
}

/// A profiler that cannot read the blob is a storage failure, not a
/// classification one.
impl From<ProfilingError> for RegistryError {
    fn from(e: ProfilingError) -> Self {
        match e {
            ProfilingError::Io(reason) => Self::Storage(StoreError::Io(reason)),
            other => Self::Classification(other),
        }
    }
}

impl RegistryError {
    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadIdentifier(_) => "bad_identifier",
            Self::Fetch(FetchError::BadUrl { .. }) => "bad_url",
            Self::Fetch(FetchError::Connection { .. }) => "connection_error",
            Self::Fetch(FetchError::Response { .. }) => "response_error",
            Self::Fetch(FetchError::Status { .. }) => "status_error",
            Self::Fetch(FetchError::TooManyRedirects { .. }) => "too_many_redirects",
            Self::Fetch(FetchError::DataStream { .. }) => "data_stream_error",
            Self::Storage(_) => "storage_error",
            Self::Classification(_) => "classification_error",
            Self::PolicyRejected(_) => "policy_rejected",
            Self::NotFound(_) => "not_found",
            Self::NotEditable(_) => "not_editable",
            Self::Archive(_) => "archive_error",
            Self::Aborted(_) => "aborted",
        }
    }
}
