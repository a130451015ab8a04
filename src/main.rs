use clap::Parser;

use stowage::cli::{self, Cli, Command, ConfigCommand};
use stowage::config;
use stowage::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            cli::handle_version();
            return Ok(());
        }
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path(cli.config.as_deref());
            return Ok(());
        }
        _ => {}
    }

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(LogConfig::from_section(&config.logging)?)?;

    match cli.command {
        Command::Ingest { files } => cli::handle_ingest(&config, &files).await,
        Command::Fetch {
            identifier,
            mediatype,
        } => cli::handle_fetch(&config, &identifier, mediatype.as_deref()).await,
        Command::Extract {
            archive,
            entry,
            mediatype,
        } => cli::handle_extract(&config, &archive, &entry, mediatype.as_deref()).await,
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(&config),
        Command::Config(ConfigCommand::Path) | Command::Version => Ok(()),
    }
}
