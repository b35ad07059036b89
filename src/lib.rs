//! # Trident-dl Library
//!
//! A concurrent, resumable file downloader for HTTP, FTP and SFTP sources.
//!
//! ## Features
//!
//! - **Three protocols**: HTTP (ranged GET), FTP (`REST`/`RETR`) and SFTP
//! - **Resumable**: pause, resume and cancel any download; a resume continues
//!   from the bytes already on disk
//! - **Duplicate detection**: an existing local copy is digested against the
//!   remote object before any bytes are transferred
//! - **Disk-space gate**: a transfer only starts when the destination volume
//!   has room for it
//! - **Change notifications**: subscribe to size, progress and status changes
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = trident_dl::Config::default().with_base_dir("/srv/downloads");
//!     let snapshot = trident_dl::fetch("http://example.com/data.bin", config).await?;
//!     println!("{}: {}", snapshot.url, snapshot.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Managing Several Downloads
//!
//! ```rust,no_run
//! use trident_dl::{Config, Downloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Downloader::with_config(Config::default());
//!     let mut changes = downloader.subscribe();
//!
//!     let report = downloader.submit("ftp://ftp.example.com/pub/report.pdf,alice,secret")?;
//!     downloader.submit("sftp://files.example.com/archive.tar,bob,hunter2")?;
//!
//!     report.pause()?;
//!     report.resume()?;
//!
//!     while let Some(change) = changes.recv().await {
//!         println!("{} {:?}", change.snapshot.url, change.snapshot.progress());
//!     }
//!     Ok(())
//! }
//! ```

pub use crate::core::config::{Config, DEFAULT_CONFIG_FILE};
pub use crate::core::connector::{
    Connector, Connectors, FtpConnector, HttpConnector, Session, SftpConnector,
};
#[cfg(any(test, feature = "test-util"))]
pub use crate::core::connector::MemoryConnector;
pub use crate::core::download::{Command, Download, Snapshot, Status, display_size};
pub use crate::core::downloader::{Downloader, DownloaderBuilder};
pub use crate::core::error::{Error, Result};
pub use crate::core::observer::{ErrorReporter, Notification, SubscriberId, Subscription};
pub use crate::core::source::{Protocol, Source};
pub use crate::core::space::{FixedSpace, SpaceProbe, SystemSpace};
pub use crate::core::stream::DownloadStream;

// Internal modules
mod core;

/// Download one URL and wait for its worker to finish
///
/// Returns the final snapshot; a failed transfer is reported through its
/// `status` and `last_error` rather than as an `Err`. Only an invalid URL
/// fails the call itself.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use trident_dl::{Config, Status};
///
/// let snapshot = trident_dl::fetch("http://example.com/data.bin", Config::default()).await?;
/// assert_eq!(snapshot.status, Status::Complete);
/// # Ok(())
/// # }
/// ```
pub async fn fetch(url: &str, config: Config) -> Result<Snapshot> {
    let downloader = Downloader::with_config(config);
    let download = downloader.submit(url)?;
    download.settle().await;
    Ok(download.snapshot())
}

/// Download with progress tracking
///
/// The callback receives `(transferred, size)` on every change; `size` is
/// `None` until the remote object has been measured.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// trident_dl::fetch_with_progress(
///     "http://example.com/data.bin",
///     trident_dl::Config::default(),
///     |transferred, size| {
///         if let Some(size) = size {
///             println!("Progress: {:.1}%", transferred as f64 / size as f64 * 100.0);
///         }
///     },
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn fetch_with_progress<F>(url: &str, config: Config, progress: F) -> Result<Snapshot>
where
    F: Fn(u64, Option<u64>) + Send + Sync + 'static,
{
    let downloader = Downloader::with_config(config);
    let mut changes = downloader.subscribe();
    let download = downloader.submit(url)?;

    while let Some(change) = changes.recv().await {
        if change.download != download {
            continue;
        }
        progress(change.snapshot.transferred, change.snapshot.size);
        if change.snapshot.status != Status::Downloading {
            break;
        }
    }

    download.settle().await;
    Ok(download.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let err = fetch("mailto:someone@example.com", Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSource(_)));
    }

    #[tokio::test]
    async fn test_fetch_with_progress_reports_until_complete() {
        let server = MockServer::start().await;
        let body = vec![9u8; 10_000];
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "10000"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/octet-stream"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let snapshot = fetch_with_progress(
            &format!("{}/payload.bin", server.uri()),
            Config::default().with_base_dir(dir.path()),
            move |transferred, size| sink.lock().unwrap().push((transferred, size)),
        )
        .await
        .unwrap();

        assert_eq!(snapshot.status, Status::Complete);
        assert_eq!(std::fs::read(&snapshot.local_path).unwrap(), body);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(10_000, Some(10_000))));
        assert!(seen.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }
}
