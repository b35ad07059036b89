//! Worker episode: connect, size, dedup, space gate, then the copy loop
//!
//! One `run` future drives one DOWNLOADING episode of a download end to end.
//! Every protocol or I/O failure is caught here and becomes an ERROR
//! transition; nothing escapes the worker.

use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::core::config::Config;
use crate::core::connector::{Connectors, Session};
use crate::core::download::Download;
use crate::core::duplicate::{self, Verdict};
use crate::core::error::{Error, Result};
use crate::core::observer::{ErrorReporter, ObserverHub};
use crate::core::space::SpaceProbe;
use crate::core::stream::DownloadStream;

/// Everything a worker needs besides the download itself
pub(crate) struct Engine {
    pub(crate) config: Config,
    pub(crate) connectors: Connectors,
    pub(crate) hub: ObserverHub,
    pub(crate) space: Arc<dyn SpaceProbe>,
    pub(crate) reporter: Option<ErrorReporter>,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        connectors: Connectors,
        space: Arc<dyn SpaceProbe>,
        reporter: Option<ErrorReporter>,
    ) -> Self {
        Self {
            config,
            connectors,
            hub: ObserverHub::new(),
            space,
            reporter,
        }
    }
}

/// Signals episode exit however the worker leaves, panics included
struct EpisodeGuard {
    download: Download,
    episode: u64,
}

impl Drop for EpisodeGuard {
    fn drop(&mut self) {
        self.download.episode_finished(self.episode);
    }
}

/// Run one episode after the previous worker (if any) has fully exited
pub(crate) async fn run(download: Download, episode: u64, previous: Option<JoinHandle<()>>) {
    let _guard = EpisodeGuard {
        download: download.clone(),
        episode,
    };

    if let Some(previous) = previous {
        let _ = previous.await;
    }

    if !download.is_active(episode) {
        log::debug!("Episode {episode} of download {} superseded before start", download.id());
        return;
    }

    if let Err(e) = drive(&download, episode).await {
        download.fail(episode, &e);
    }
}

async fn drive(download: &Download, episode: u64) -> Result<()> {
    let engine = download.engine();
    let source = download.source();
    let timeout = engine.config.io_timeout;
    let connector = engine.connectors.for_protocol(source.protocol);

    log::info!("Connecting to {} for {}", source.host, download.display_url());
    let mut session = deadline(timeout, "connect", connector.connect(source)).await?;

    let result = transfer(download, episode, session.as_mut()).await;

    // Best-effort; a close failure never masks the episode's own error.
    session.close().await;
    result
}

async fn transfer(download: &Download, episode: u64, session: &mut dyn Session) -> Result<()> {
    let engine = download.engine();
    let config = &engine.config;
    let path = download.source().path.clone();
    let local_path = download.local_path().to_path_buf();

    let remote_size = deadline(config.io_timeout, "size query", session.fetch_size(&path)).await?;
    if remote_size < 1 {
        return Err(Error::Metadata(format!("{path} reports {remote_size} bytes")));
    }
    let size = download.record_size(episode, remote_size)?;
    log::info!("File: {}, size: {size}", download.source().filename);

    let local_len = match tokio::fs::metadata(&local_path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    let mut offset = local_len;
    if local_len > 0 {
        // A digest can only match when the lengths already agree.
        let verdict = if local_len != size {
            Verdict::Differs
        } else if config.verify_existing {
            duplicate::check(session, &path, &local_path, config.io_timeout, || {
                download.is_active(episode)
            })
            .await?
        } else {
            Verdict::Duplicate
        };

        match verdict {
            Verdict::Duplicate => {
                log::info!(
                    "The remote file ({}) already exists at {}",
                    download.source().filename,
                    local_path.display()
                );
                download.complete(episode, size);
                return Ok(());
            }
            Verdict::Interrupted => return Ok(()),
            Verdict::Differs if local_len >= size => {
                log::warn!(
                    "{} holds {local_len} bytes that do not match the remote, restarting",
                    local_path.display()
                );
                offset = 0;
            }
            Verdict::Differs => {}
        }
    }

    let dir = download.source().local_dir(&config.base_dir);
    match available_space(&engine.space, &dir).await {
        Some(available) if available <= size => {
            return Err(Error::InsufficientSpace {
                available,
                required: size,
            });
        }
        Some(_) => {}
        None => log::warn!("Could not determine free space for {}", dir.display()),
    }

    if !download.is_active(episode) {
        return Ok(());
    }

    download.set_transferred(episode, offset);

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&local_path)
        .await?;
    if offset == 0 {
        file.set_len(0).await?;
    }
    file.seek(SeekFrom::Start(offset)).await?;

    if offset >= size {
        download.complete(episode, size);
        return Ok(());
    }

    let mut stream = deadline(
        config.io_timeout,
        "stream open",
        session.open_stream(&path, offset),
    )
    .await?;

    let copied = copy_loop(download, episode, &mut stream, &mut file, offset, size).await;
    drop(stream);
    // Flush before reporting so the bytes are on disk when the episode ends.
    file.flush().await?;
    let transferred = copied?;

    if transferred == size {
        log::info!("Finished downloading {}", local_path.display());
        download.complete(episode, transferred);
    } else if download.is_active(episode) {
        return Err(Error::Transfer(format!(
            "connection closed after {transferred} of {size} bytes"
        )));
    }
    Ok(())
}

/// Probe free space on the blocking pool; mount enumeration hits the filesystem
async fn available_space(space: &Arc<dyn SpaceProbe>, dir: &Path) -> Option<u64> {
    let space = Arc::clone(space);
    let dir = dir.to_path_buf();
    match tokio::task::spawn_blocking(move || space.available(&dir)).await {
        Ok(available) => available,
        Err(e) => {
            log::warn!("Free-space probe failed: {e}");
            None
        }
    }
}

/// Copy until `size` bytes are on disk, EOF, or a pause/cancel is observed.
///
/// Status is rechecked before every read; an in-flight read and its write
/// always finish, so at most one buffer lands after a command.
async fn copy_loop(
    download: &Download,
    episode: u64,
    stream: &mut DownloadStream,
    file: &mut tokio::fs::File,
    offset: u64,
    size: u64,
) -> Result<u64> {
    let config = &download.engine().config;
    let mut buffer = vec![0u8; config.buffer_size.max(1)];
    let mut transferred = offset;

    while transferred < size && download.is_active(episode) {
        let want = buffer.len().min((size - transferred) as usize);
        let read = read_with_deadline(stream, &mut buffer[..want], config.io_timeout).await?;
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read]).await?;
        transferred += read as u64;
        // The final count is published together with COMPLETE.
        if transferred < size {
            download.set_transferred(episode, transferred);
        }
    }

    Ok(transferred)
}

pub(crate) async fn read_with_deadline(
    stream: &mut DownloadStream,
    buffer: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    let read = stream.read(buffer);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| Error::Transfer(format!("no data received for {limit:?}")))?,
        None => read.await,
    };
    result.map_err(|e| Error::Transfer(format!("stream read error: {e}")))
}

/// Bound a connector call by the configured I/O timeout
pub(crate) async fn deadline<T>(
    timeout: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Connection(format!("{what} timed out after {limit:?}")))?,
        None => fut.await,
    }
}
