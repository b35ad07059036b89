//! # Trident-dl CLI
//!
//! Command-line interface for the trident-dl library.
//! Downloads one or more HTTP, FTP or SFTP URLs concurrently.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::error;
use trident_dl::{Config, Downloader, Status};

mod cli;

/// Command-line interface for trident-dl
#[derive(Parser)]
#[command(name = "trident-dl")]
#[command(about = "Concurrent, resumable HTTP/FTP/SFTP downloader")]
#[command(long_about = "Downloads every URL concurrently into <base-dir>/<host>/<file>:
  trident-dl http://example.com/data.bin
  trident-dl ftp://ftp.example.com/pub/report.pdf,alice,secret
  trident-dl sftp://files.example.com/archive.tar,bob,hunter2

Press Ctrl-C to pause all downloads; run the same command again to resume
from the bytes already on disk.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// URLs to download (http, ftp or sftp)
    #[arg(required = true)]
    urls: Vec<String>,

    /// Properties file holding BASE.DOWNLOAD.PATH
    #[arg(long, default_value = trident_dl::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Base download directory (overrides the properties file)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Copy buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Network timeout in seconds; 0 disables it
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not digest an existing local file against the remote before resuming
    #[arg(long)]
    skip_verify: bool,

    /// Print the final status as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🔱 Trident-dl v{} starting...", env!("CARGO_PKG_VERSION"));
    }

    let config = build_config(&cli)?;
    eprintln!("📁 Saving under: {}", config.base_dir.display());

    let downloader = Downloader::with_config(config);
    let mut changes = downloader.subscribe();
    let mut board = cli::ProgressBoard::new();
    let mut rejected = 0;

    for url in &cli.urls {
        match downloader.submit(url) {
            Ok(download) => board.add(&download),
            Err(e) => {
                eprintln!("❌ {e}");
                rejected += 1;
            }
        }
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    while any_downloading(&downloader) {
        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => board.update(&change.snapshot),
                None => break,
            },
            result = &mut interrupt => {
                result.context("Failed to listen for Ctrl-C")?;
                let paused = downloader.pause_all();
                eprintln!("⏸️  Paused {paused} download(s); run again to resume");
                break;
            }
        }
    }

    downloader.settle().await;
    for snapshot in downloader.snapshots() {
        board.update(&snapshot);
    }
    board.finish();

    let snapshots = downloader.snapshots();
    if cli.json {
        let json = serde_json::to_string_pretty(&snapshots)
            .context("Failed to serialize download status")?;
        println!("{json}");
    } else {
        print!("{}", cli::render_table(&snapshots));
    }

    let failed = snapshots.iter().any(|s| s.status == Status::Error);
    Ok(if failed || rejected > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Properties file first, then command-line overrides
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_properties_file(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;

    if let Some(dir) = &cli.base_dir {
        config.base_dir = dir.clone();
    }
    if let Some(size) = cli.buffer_size {
        anyhow::ensure!(size > 0, "--buffer-size must be at least 1");
        config.buffer_size = size;
    }
    if let Some(secs) = cli.timeout {
        config.io_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if cli.skip_verify {
        config.verify_existing = false;
    }
    Ok(config)
}

fn any_downloading(downloader: &Downloader) -> bool {
    downloader
        .list()
        .iter()
        .any(|d| d.status() == Status::Downloading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("trident-dl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_urls_are_required() {
        assert!(Cli::try_parse_from(["trident-dl"]).is_err());
    }

    #[test]
    fn test_flags_override_properties_file() {
        let dir = tempdir().unwrap();
        let props = dir.path().join("config.properties");
        std::fs::write(&props, "BASE.DOWNLOAD.PATH=/from/file\n").unwrap();

        let cli = parse(&[
            "--config",
            props.to_str().unwrap(),
            "--base-dir",
            "/from/flag",
            "--buffer-size",
            "8192",
            "--timeout",
            "0",
            "--skip-verify",
            "http://example.com/a.bin",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.io_timeout, None);
        assert!(!config.verify_existing);
    }

    #[test]
    fn test_properties_file_used_without_flags() {
        let dir = tempdir().unwrap();
        let props = dir.path().join("config.properties");
        std::fs::write(&props, "BASE.DOWNLOAD.PATH=/from/file\n").unwrap();

        let cli = parse(&["--config", props.to_str().unwrap(), "--timeout", "5", "ftp://h/f"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/from/file"));
        assert_eq!(config.io_timeout, Some(Duration::from_secs(5)));
        assert!(config.verify_existing);
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let cli = parse(&["--buffer-size", "0", "http://example.com/a.bin"]);
        assert!(build_config(&cli).is_err());
    }
}
