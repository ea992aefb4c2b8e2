//! Undertow CLI - stream a file while it downloads
//!
//! Opens a source on the simulated engine, picks a file (or every media
//! file in playlist mode) and serves it over HTTP until Ctrl-C.

mod commands;
mod logging;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::logging::CliLogLevel;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "undertow")]
#[command(about = "Stream media files from a swarm while they download")]
#[command(version)]
pub struct Cli {
    /// Magnet link, manifest URL or path to a manifest file
    pub source: Option<String>,

    /// HTTP port to listen on
    #[arg(short, long, visible_alias = "http")]
    pub port: Option<u16>,

    /// Address to bind the HTTP listener to
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Working directory; data goes to <DIR>/undertow
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Keep downloaded data on exit
    #[arg(long)]
    pub no_cleanup: bool,

    /// Serve the largest file without asking
    #[arg(long, conflicts_with_all = ["file", "all"])]
    pub largest: bool,

    /// Serve every media file through an M3U playlist
    #[arg(long, conflicts_with = "file")]
    pub all: bool,

    /// Serve the file with this index without asking
    #[arg(long, value_name = "INDEX")]
    pub file: Option<usize>,

    /// Readahead window per stream in bytes
    #[arg(long, value_name = "BYTES")]
    pub readahead: Option<u64>,

    /// Give up waiting for metadata after this many seconds
    #[arg(long, value_name = "SECS")]
    pub metadata_timeout: Option<u64>,

    /// Serve real files from this directory through the simulated swarm
    #[arg(long, value_name = "DIR")]
    pub seed_dir: Option<PathBuf>,

    /// Simulated download rate in bytes per second
    #[arg(long, value_name = "BYTES/S")]
    pub rate: Option<u64>,

    /// Do not clear the terminal between status frames
    #[arg(long)]
    pub no_clear: bool,

    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn")]
    pub log_level: CliLogLevel,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_level);

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("{}", commands::failure_report(e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_http_alias_sets_port() {
        let cli = Cli::try_parse_from(["undertow", "--http", "9000", "movie.torrent"]).unwrap();

        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.source.as_deref(), Some("movie.torrent"));
    }

    #[test]
    fn test_selection_flags_conflict() {
        let result = Cli::try_parse_from(["undertow", "--largest", "--all", "movie.torrent"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["undertow", "magnet:?xt=urn:btih:abc"]).unwrap();

        assert!(!cli.no_cleanup);
        assert!(!cli.all);
        assert_eq!(cli.port, None);
        assert_eq!(cli.file, None);
    }
}
