//! Archive entry extraction
//!
//! Pulls a single named entry out of a stored zip, tar or gzip-compressed tar
//! blob so it can be ingested on its own. Decoding is synchronous and meant
//! to run on the blocking pool.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::profiler::{Profile, MEDIATYPE_GZIP, MEDIATYPE_TAR, MEDIATYPE_ZIP};

/// Errors that can occur while extracting an archive entry
#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error("Not an archive: {0}")]
    Unsupported(String),

    #[error("Archive entry not found: {0}")]
    EntryNotFound(String),

    #[error("Archive entry too large: more than {max} bytes")]
    EntryTooLarge { max: u64 },

    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Supported archive container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Pick the archive format from an entry's primary profile
    pub fn from_profile(profile: &Profile) -> Option<Self> {
        match profile.essence().as_str() {
            MEDIATYPE_ZIP | "application/x-zip-compressed" => Some(Self::Zip),
            MEDIATYPE_TAR => Some(Self::Tar),
            MEDIATYPE_GZIP | "application/x-gzip" | "application/x-compressed-tar" => {
                Some(Self::TarGz)
            }
            _ => None,
        }
    }
}

/// Read the entry called `entry_name` from the archive at `path`.
///
/// Entries larger than `max_size` are refused without reading them whole.
pub fn extract_entry(
    path: &Path,
    kind: ArchiveKind,
    entry_name: &str,
    max_size: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::Io(e.to_string()))?;
    let wanted = normalize_entry_name(entry_name);
    if wanted.is_empty() {
        return Err(ArchiveError::EntryNotFound(entry_name.to_string()));
    }

    match kind {
        ArchiveKind::Zip => extract_from_zip(file, &wanted, max_size),
        ArchiveKind::Tar => extract_from_tar(BufReader::new(file), &wanted, max_size),
        ArchiveKind::TarGz => extract_from_tar(
            flate2::read::GzDecoder::new(BufReader::new(file)),
            &wanted,
            max_size,
        ),
    }
}

fn extract_from_zip(file: File, wanted: &str, max_size: u64) -> Result<Vec<u8>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        if entry.is_dir() || normalize_entry_name(entry.name()) != wanted {
            continue;
        }
        if entry.size() > max_size {
            return Err(ArchiveError::EntryTooLarge { max: max_size });
        }
        return read_limited(entry, max_size);
    }

    Err(ArchiveError::EntryNotFound(wanted.to_string()))
}

fn extract_from_tar<R: Read>(
    reader: R,
    wanted: &str,
    max_size: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        if normalize_entry_name(&name) != wanted {
            continue;
        }
        if entry.size() > max_size {
            return Err(ArchiveError::EntryTooLarge { max: max_size });
        }
        return read_limited(entry, max_size);
    }

    Err(ArchiveError::EntryNotFound(wanted.to_string()))
}

fn read_limited<R: Read>(reader: R, max_size: u64) -> Result<Vec<u8>, ArchiveError> {
    let mut data = Vec::new();
    reader
        .take(max_size + 1)
        .read_to_end(&mut data)
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
    if data.len() as u64 > max_size {
        return Err(ArchiveError::EntryTooLarge { max: max_size });
    }
    Ok(data)
}

/// `./a//b/` and `a/b` name the same entry
fn normalize_entry_name(name: &str) -> String {
    name.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
