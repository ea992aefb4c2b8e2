//! CLI command implementation

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::task::JoinHandle;
use undertow_core::config::DATA_DIR_NAME;
use undertow_core::{
    Container, FileEntry, ProgressMonitor, SessionController, SessionError, TransferEngine,
    UndertowConfig, UndertowError,
};
use undertow_sim::{ContentMode, ManifestBuilder, SimulatedEngine, SwarmConfig};
use undertow_web::{ServeMode, ServerError, StreamServer};

use crate::Cli;

/// How the file to serve is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Largest,
    Index(usize),
    Playlist,
    Prompt,
}

impl Selection {
    fn from_cli(cli: &Cli) -> Self {
        if cli.all {
            Selection::Playlist
        } else if cli.largest {
            Selection::Largest
        } else if let Some(index) = cli.file {
            Selection::Index(index)
        } else {
            Selection::Prompt
        }
    }
}

/// Runs a full session: open, select, serve until Ctrl-C, clean up.
///
/// # Errors
/// Any startup failure, labelled with the stage that failed.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli);
    let (engine, seeded_magnet) = build_engine(&cli).await?;

    let source = match (&cli.source, seeded_magnet) {
        (Some(source), _) => source.clone(),
        (None, Some(magnet)) => magnet,
        (None, None) => bail!("No source given: pass a magnet link, manifest URL or manifest file"),
    };

    run_session(&cli, &config, engine, &source, tokio::signal::ctrl_c()).await
}

/// Serves `source` until `interrupt` resolves or startup fails.
///
/// The interrupt covers every stage, including the metadata wait and the
/// file prompt, and the session is closed on all paths.
async fn run_session<I>(
    cli: &Cli,
    config: &UndertowConfig,
    engine: Arc<dyn TransferEngine>,
    source: &str,
    interrupt: I,
) -> anyhow::Result<()>
where
    I: Future<Output = io::Result<()>>,
{
    let mut session = SessionController::new(engine, config.session.clone());

    let result = tokio::select! {
        served = serve_session(cli, config, &mut session, source) => served,
        signal = interrupt => match signal {
            Ok(()) => {
                tracing::info!("Interrupted, shutting down");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to listen for Ctrl-C")),
        },
    };

    session.close().await;
    result
}

/// Text printed to stderr when a run fails.
///
/// Session and listener failures are summarised with
/// [`UndertowError::user_message`]. The full context chain follows unless
/// the operator's input caused the failure.
pub fn failure_report(error: anyhow::Error) -> String {
    let detail = format!("{error:#}");

    let known = match error.downcast::<SessionError>() {
        Ok(session) => Some(UndertowError::from(session)),
        Err(error) => match error.downcast::<ServerError>() {
            Ok(ServerError::Bind { address, source }) => Some(UndertowError::Configuration {
                reason: format!("cannot listen on {address}: {source}"),
            }),
            Ok(ServerError::Serve(source)) => Some(UndertowError::Io(source)),
            Err(_) => None,
        },
    };

    match known {
        Some(error) if error.is_user_error() => format!("Error: {}", error.user_message()),
        Some(error) => format!("Error: {}\nCaused by: {detail}", error.user_message()),
        None => format!("Error: {detail}"),
    }
}

fn build_config(cli: &Cli) -> UndertowConfig {
    let mut config = UndertowConfig::default();

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(dir) = &cli.dir {
        config.session.working_dir = dir.join(DATA_DIR_NAME);
    }
    if cli.no_cleanup {
        config.session.cleanup = false;
    }
    if let Some(readahead) = cli.readahead {
        config.streaming.readahead_bytes = readahead;
    }
    if let Some(seconds) = cli.metadata_timeout {
        config.session.metadata_timeout = Some(Duration::from_secs(seconds));
    }

    config
}

/// Creates the simulated engine. With `--seed-dir`, the directory is
/// published as a manifest and its magnet link returned.
async fn build_engine(cli: &Cli) -> anyhow::Result<(Arc<dyn TransferEngine>, Option<String>)> {
    let mut swarm = SwarmConfig::default();
    if let Some(rate) = cli.rate {
        swarm.rate = Some(rate.max(1));
    }

    let Some(seed_dir) = &cli.seed_dir else {
        let engine: Arc<dyn TransferEngine> = Arc::new(SimulatedEngine::new(swarm));
        return Ok((engine, None));
    };

    swarm.content = ContentMode::SeedDirectory(seed_dir.clone());
    let engine = SimulatedEngine::new(swarm);

    let manifest = ManifestBuilder::from_directory(seed_dir)
        .await
        .with_context(|| format!("Failed to scan seed directory {}", seed_dir.display()))?
        .build();
    let info_hash = engine
        .publish(&manifest)
        .context("Failed to publish seed directory")?;
    let magnet = format!("magnet:?xt=urn:btih:{info_hash}");
    tracing::info!("Seeding {} as {}", seed_dir.display(), magnet);

    let engine: Arc<dyn TransferEngine> = Arc::new(engine);
    Ok((engine, Some(magnet)))
}

async fn serve_session(
    cli: &Cli,
    config: &UndertowConfig,
    session: &mut SessionController,
    source: &str,
) -> anyhow::Result<()> {
    println!("Waiting for metadata...");
    let container = session
        .open(source)
        .await
        .with_context(|| format!("Failed to open {source}"))?;

    let mode = choose_mode(Selection::from_cli(cli), &container).await?;
    let server = StreamServer::new(Arc::clone(&container), mode, config.streaming.clone());
    let serving_mode = server.mode().serving_mode();

    let bound = server
        .bind(config.server.socket_address())
        .await
        .context("Failed to start HTTP server")?;

    let clear_screen = !cli.no_clear && io::stdout().is_terminal();
    let monitor = ProgressMonitor::new(
        container,
        serving_mode,
        config.streaming.readahead_bytes,
        bound.local_addr().to_string(),
    )
    .with_clear_screen(clear_screen)
    .spawn(io::stdout());
    let _monitor = AbortOnDrop(monitor);

    bound.serve().await.context("HTTP server failed")
}

/// Stops the status display once serving ends, including on interrupt.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn choose_mode(selection: Selection, container: &Container) -> anyhow::Result<ServeMode> {
    let entry = match selection {
        Selection::Playlist => return Ok(ServeMode::Playlist),
        Selection::Largest => container
            .largest_file()
            .cloned()
            .context("Container has no files")?,
        Selection::Index(index) => container.file(index).cloned().with_context(|| {
            format!(
                "No file with index {index}; the container has {} files",
                container.files().len()
            )
        })?,
        Selection::Prompt => {
            // A detached thread, so an interrupt mid-prompt does not leave
            // runtime shutdown waiting on a blocked stdin read.
            let files = container.files().to_vec();
            let (choice_tx, choice_rx) = tokio::sync::oneshot::channel();
            std::thread::spawn(move || {
                let _ = choice_tx.send(prompt_for_file(&files, io::stdin().lock(), io::stdout()));
            });
            choice_rx
                .await
                .context("File prompt ended unexpectedly")?
                .context("Failed to read file choice")?
        }
    };

    tracing::info!("Selected {} ({} bytes)", entry.path(), entry.length());
    Ok(ServeMode::Single(entry))
}

/// Lists the files and reads an index until a valid one is entered.
fn prompt_for_file<R, W>(files: &[FileEntry], mut input: R, mut output: W) -> io::Result<FileEntry>
where
    R: BufRead,
    W: Write,
{
    writeln!(
        output,
        "Found these files in the container. Select which one you'd like to stream:"
    )?;
    writeln!(output)?;
    for (index, file) in files.iter().enumerate() {
        writeln!(output, "    [{index}] {}", file.path())?;
    }
    writeln!(output)?;

    let mut line = String::new();
    loop {
        write!(output, "File: ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before a file was chosen",
            ));
        }

        match line.trim().parse::<usize>() {
            Ok(index) if index < files.len() => return Ok(files[index].clone()),
            _ => writeln!(output, "Invalid choice")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use undertow_core::TransferHandle;
    use undertow_core::config::{DEFAULT_HTTP_PORT, DEFAULT_READAHEAD_BYTES};

    use super::*;

    fn files() -> Vec<FileEntry> {
        vec![
            FileEntry::new(0, "movie.mkv", 0, 100),
            FileEntry::new(1, "subs/movie.srt", 100, 10),
        ]
    }

    fn prompt(input: &str) -> (io::Result<FileEntry>, String) {
        let mut output = Vec::new();
        let result = prompt_for_file(&files(), input.as_bytes(), &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_prompt_lists_files() {
        let (result, output) = prompt("1\n");

        assert_eq!(result.unwrap().path(), "subs/movie.srt");
        assert!(output.contains("    [0] movie.mkv\n"));
        assert!(output.contains("    [1] subs/movie.srt\n"));
        assert!(!output.contains("Invalid choice"));
    }

    #[test]
    fn test_prompt_rejects_index_equal_to_len() {
        let (result, output) = prompt("2\nabc\n-1\n0\n");

        assert_eq!(result.unwrap().index(), 0);
        assert_eq!(output.matches("Invalid choice").count(), 3);
    }

    #[test]
    fn test_prompt_fails_on_closed_input() {
        let (result, _) = prompt("7\n");

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_selection_from_flags() {
        let parse = |args: &[&str]| {
            let cli = Cli::try_parse_from(args).unwrap();
            Selection::from_cli(&cli)
        };

        assert_eq!(parse(&["undertow", "x"]), Selection::Prompt);
        assert_eq!(parse(&["undertow", "--largest", "x"]), Selection::Largest);
        assert_eq!(
            parse(&["undertow", "--file", "3", "x"]),
            Selection::Index(3)
        );
        assert_eq!(parse(&["undertow", "--all", "x"]), Selection::Playlist);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "undertow",
            "--port",
            "9001",
            "--dir",
            "/srv",
            "--no-cleanup",
            "--readahead",
            "2048",
            "--metadata-timeout",
            "30",
            "x",
        ])
        .unwrap();

        let config = build_config(&cli);

        assert_eq!(config.server.port, 9001);
        assert_eq!(
            config.session.working_dir,
            std::path::Path::new("/srv/undertow")
        );
        assert!(!config.session.cleanup);
        assert_eq!(config.streaming.readahead_bytes, 2048);
        assert_eq!(
            config.session.metadata_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_config_ignores_environment() {
        unsafe {
            std::env::set_var("UNDERTOW_PORT", "9191");
            std::env::set_var("UNDERTOW_READAHEAD", "1048576");
        }
        let cli = Cli::try_parse_from(["undertow", "x"]).unwrap();

        let config = build_config(&cli);

        unsafe {
            std::env::remove_var("UNDERTOW_PORT");
            std::env::remove_var("UNDERTOW_READAHEAD");
        }
        assert_eq!(config.server.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.streaming.readahead_bytes, DEFAULT_READAHEAD_BYTES);
    }

    #[test]
    fn test_failure_report_summarises_session_errors() {
        let missing: anyhow::Result<()> = Err(SessionError::ReadManifest {
            path: PathBuf::from("/srv/movie.torrent"),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
        .context("Failed to open /srv/movie.torrent");
        assert_eq!(
            failure_report(missing.unwrap_err()),
            "Error: Could not read /srv/movie.torrent"
        );

        let timeout: anyhow::Result<()> = Err(SessionError::MetadataTimeout {
            after: Duration::from_secs(30),
        })
        .context("Failed to open magnet:?xt=urn:btih:abc");
        let report = failure_report(timeout.unwrap_err());
        assert!(report.starts_with("Error: No metadata received after 30 seconds\n"));
        assert!(report.contains("Caused by: Failed to open magnet:?xt=urn:btih:abc"));
    }

    #[test]
    fn test_failure_report_summarises_listener_errors() {
        let bind: anyhow::Result<()> = Err(ServerError::Bind {
            address: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        })
        .context("Failed to start HTTP server");

        let report = failure_report(bind.unwrap_err());

        assert!(report.starts_with("Error: Configuration error: cannot listen on 127.0.0.1:8080"));
        assert!(!report.contains("Caused by"));
    }

    #[test]
    fn test_failure_report_keeps_unclassified_errors() {
        let report = failure_report(anyhow::anyhow!("Container has no files"));

        assert_eq!(report, "Error: Container has no files");
    }

    #[tokio::test]
    async fn test_interrupt_during_metadata_wait_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let source = format!("magnet:?xt=urn:btih:{}", "ab".repeat(20));
        let cli = Cli::try_parse_from([
            "undertow",
            "--dir",
            dir.path().to_str().unwrap(),
            "--largest",
            source.as_str(),
        ])
        .unwrap();
        let config = build_config(&cli);
        let working_dir = config.session.working_dir.clone();
        let engine: Arc<dyn TransferEngine> =
            Arc::new(SimulatedEngine::new(SwarmConfig::manual()));

        // Metadata for this magnet never arrives; interrupt once open has
        // created the working directory.
        let interrupt = {
            let working_dir = working_dir.clone();
            async move {
                while !working_dir.exists() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok::<(), io::Error>(())
            }
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            run_session(&cli, &config, engine, &source, interrupt),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!working_dir.exists());
    }

    #[tokio::test]
    async fn test_seed_dir_publishes_magnet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), [0u8; 64]).unwrap();
        let seed = dir.path().to_str().unwrap();
        let cli =
            Cli::try_parse_from(["undertow", "--seed-dir", seed, "--rate", "1000000"]).unwrap();

        let (engine, magnet) = build_engine(&cli).await.unwrap();
        let magnet = magnet.unwrap();
        let handle = engine.add_magnet(&magnet).await.unwrap();
        handle.metadata_ready().await;

        assert_eq!(handle.total_length(), Some(64));
        assert_eq!(handle.files()[0].path, "clip.mp4");
        engine.close().await;
    }

    #[tokio::test]
    async fn test_choose_mode_by_index() {
        let container = container_with(&[("a.mkv", 10), ("b.mkv", 30)]).await;

        let mode = choose_mode(Selection::Index(1), &container).await.unwrap();
        assert!(matches!(mode, ServeMode::Single(ref entry) if entry.path() == "b.mkv"));

        let largest = choose_mode(Selection::Largest, &container).await.unwrap();
        assert!(matches!(largest, ServeMode::Single(ref entry) if entry.index() == 1));

        assert!(choose_mode(Selection::Index(2), &container).await.is_err());
    }

    async fn container_with(files: &[(&str, u64)]) -> Container {
        let mut builder = ManifestBuilder::multi_file("pack");
        for (path, length) in files {
            builder = builder.file(*path, *length);
        }
        let engine = SimulatedEngine::new(SwarmConfig::manual());
        let handle = engine.add_manifest_bytes(&builder.build()).await.unwrap();
        Container::from_handle(handle).unwrap()
    }
}
