//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `ingest <FILE>...` -- store local files and print their entries
//! - `fetch <IDENTIFIER>` -- download a URL, DOI or handle and store it
//! - `extract <ARCHIVE> <ENTRY>` -- store an archive, then one of its entries
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::{self, StowageConfig};
use crate::profiler::Profile;
use crate::registry::{FileInfo, MediaRegistry, Preview};

/// Temporary media store with classification and retention.
#[derive(Parser, Debug)]
#[command(
    name = "stowage",
    version = env!("CARGO_PKG_VERSION"),
    about = "Stowage: ingest, classify and temporarily keep media files"
)]
pub struct Cli {
    /// Configuration file (default: $STOWAGE_CONFIG_PATH or ~/.stowage/stowage.json5).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store local files and print the resulting entries as JSON.
    Ingest {
        /// Files to store.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download a URL, DOI or handle and store the response body.
    Fetch {
        /// http(s) URL, DOI (doi:10.xxx/...) or handle (hdl:xxx/...).
        identifier: String,

        /// Declared media type, used as the primary profile.
        #[arg(long)]
        mediatype: Option<String>,
    },

    /// Store an archive file, then the named entry extracted from it.
    Extract {
        /// Path to a zip, tar or tar.gz file.
        archive: PathBuf,

        /// Entry path inside the archive.
        entry: String,

        /// Declared media type of the entry.
        #[arg(long)]
        mediatype: Option<String>,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// An entry as printed by the CLI
#[derive(Debug, Serialize)]
struct EntryOutput {
    #[serde(flatten)]
    entry: FileInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<Preview>,
}

async fn entry_output(registry: &MediaRegistry, entry: FileInfo) -> EntryOutput {
    let preview = if entry.profile.is_text() {
        match registry.preview(entry.id).await {
            Ok(preview) => Some(preview),
            Err(e) => {
                tracing::warn!(id = %entry.id, error = %e, "Failed to build preview");
                None
            }
        }
    } else {
        None
    };
    EntryOutput { entry, preview }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the `ingest` subcommand.
pub async fn handle_ingest(
    config: &StowageConfig,
    files: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = MediaRegistry::from_config(config).await?;

    let mut outputs = Vec::with_capacity(files.len());
    for path in files {
        let entry = ingest_file(&registry, path).await?;
        outputs.push(entry_output(&registry, entry).await);
    }

    registry.shutdown().await;
    print_json(&outputs)
}

async fn ingest_file(
    registry: &MediaRegistry,
    path: &Path,
) -> Result<FileInfo, Box<dyn std::error::Error>> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(registry.add_media(&filename, file).await?)
}

/// Run the `fetch` subcommand.
pub async fn handle_fetch(
    config: &StowageConfig,
    identifier: &str,
    mediatype: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = MediaRegistry::from_config(config).await?;

    let entry = registry
        .add_by_url(identifier, mediatype.map(Profile::new))
        .await?;
    let output = entry_output(&registry, entry).await;

    registry.shutdown().await;
    print_json(&output)
}

/// Run the `extract` subcommand.
pub async fn handle_extract(
    config: &StowageConfig,
    archive: &Path,
    entry_name: &str,
    mediatype: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = MediaRegistry::from_config(config).await?;

    let parent = ingest_file(&registry, archive).await?;
    let entry = registry
        .add_from_archive(parent.id, entry_name, mediatype.map(Profile::new))
        .await?;

    let outputs = vec![
        entry_output(&registry, parent).await,
        entry_output(&registry, entry).await,
    ];

    registry.shutdown().await;
    print_json(&outputs)
}

/// Run the `config show` subcommand.
pub fn handle_config_show(config: &StowageConfig) -> Result<(), Box<dyn std::error::Error>> {
    print_json(config)
}

/// Run the `config path` subcommand.
pub fn handle_config_path(explicit: Option<&Path>) {
    println!("{}", config::get_config_path(explicit).display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("stowage {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["stowage"]).is_err());
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["stowage", "version"]).unwrap();
        assert!(matches!(cli.command, Command::Version));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_ingest_files() {
        let cli = Cli::try_parse_from(["stowage", "ingest", "a.txt", "b.pdf"]).unwrap();
        match cli.command {
            Command::Ingest { ref files } => {
                assert_eq!(files, &[PathBuf::from("a.txt"), PathBuf::from("b.pdf")]);
            }
            other => panic!("Expected Ingest, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_ingest_needs_a_file() {
        assert!(Cli::try_parse_from(["stowage", "ingest"]).is_err());
    }

    #[test]
    fn test_cli_fetch_with_mediatype() {
        let cli = Cli::try_parse_from([
            "stowage",
            "fetch",
            "doi:10.1000/182",
            "--mediatype",
            "text/plain",
        ])
        .unwrap();
        match cli.command {
            Command::Fetch {
                ref identifier,
                ref mediatype,
            } => {
                assert_eq!(identifier, "doi:10.1000/182");
                assert_eq!(mediatype.as_deref(), Some("text/plain"));
            }
            other => panic!("Expected Fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_extract() {
        let cli = Cli::try_parse_from(["stowage", "extract", "corpus.zip", "docs/a.txt"]).unwrap();
        match cli.command {
            Command::Extract {
                ref archive,
                ref entry,
                ref mediatype,
            } => {
                assert_eq!(archive, &PathBuf::from("corpus.zip"));
                assert_eq!(entry, "docs/a.txt");
                assert!(mediatype.is_none());
            }
            other => panic!("Expected Extract, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli =
            Cli::try_parse_from(["stowage", "config", "show", "--config", "/tmp/s.json5"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json5")));
    }

    #[test]
    fn test_cli_config_path() {
        let cli = Cli::try_parse_from(["stowage", "config", "path"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }

    #[tokio::test]
    async fn test_ingest_file_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"some notes").unwrap();

        let mut config = StowageConfig::default();
        config.storage.data_dir = dir.path().join("blobs");
        let registry = MediaRegistry::from_config(&config).await.unwrap();

        let entry = ingest_file(&registry, &path).await.unwrap();
        assert_eq!(entry.filename, "notes.txt");

        let output = entry_output(&registry, entry).await;
        assert_eq!(
            output.preview.map(|p| p.content),
            Some("some notes".to_string())
        );

        let missing = ingest_file(&registry, &dir.path().join("absent.txt")).await;
        assert!(missing.is_err());
        registry.shutdown().await;
    }
}
