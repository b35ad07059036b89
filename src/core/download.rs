//! The download entity and its state machine
//!
//! Commands (`pause`, `resume`, `cancel`) and worker updates are all
//! synchronized transitions on one mutex-guarded `State`. Each DOWNLOADING
//! episode carries a number; a worker only ever mutates the entity while its
//! episode is the current one, so a stale worker winding down after a pause
//! can never clobber a newer episode or a CANCELLED status.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::error::{Error, Result};
use crate::core::source::{Protocol, Source};
use crate::core::worker::{self, Engine};

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Downloading,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl Status {
    pub fn can_pause(self) -> bool {
        self == Status::Downloading
    }

    pub fn can_resume(self) -> bool {
        matches!(self, Status::Paused | Status::Error)
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, Status::Downloading | Status::Paused)
    }

    pub fn can_clear(self) -> bool {
        matches!(self, Status::Complete | Status::Cancelled | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Downloading => "Downloading",
            Status::Paused => "Paused",
            Status::Complete => "Complete",
            Status::Cancelled => "Cancelled",
            Status::Error => "Error",
        };
        f.write_str(name)
    }
}

/// User-issued commands, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Cancel,
    Clear,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Cancel => "cancel",
            Command::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of a download's observable fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: u64,
    pub url: String,
    pub protocol: Protocol,
    pub local_path: PathBuf,
    /// `None` until the first successful metadata fetch
    pub size: Option<u64>,
    pub transferred: u64,
    pub status: Status,
    pub last_error: Option<String>,
}

impl Snapshot {
    /// Percentage complete, or `None` while the size is indeterminate
    pub fn progress(&self) -> Option<f64> {
        match self.size {
            Some(size) if size > 0 => Some(self.transferred as f64 / size as f64 * 100.0),
            _ => None,
        }
    }

    /// Size as shown in a download list; empty while unknown
    pub fn size_display(&self) -> String {
        self.size.map(display_size).unwrap_or_default()
    }
}

/// Human-readable byte count truncated to whole units ("3 MB", "512 bytes")
pub fn display_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes / TB > 0 {
        format!("{} TB", bytes / TB)
    } else if bytes / GB > 0 {
        format!("{} GB", bytes / GB)
    } else if bytes / MB > 0 {
        format!("{} MB", bytes / MB)
    } else if bytes / KB > 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} bytes")
    }
}

struct State {
    size: Option<u64>,
    transferred: u64,
    status: Status,
    last_error: Option<String>,
    episode: u64,
    cleared: bool,
}

struct Inner {
    id: u64,
    source: Source,
    local_path: PathBuf,
    engine: Arc<Engine>,
    state: Mutex<State>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Highest episode whose worker has exited
    finished: watch::Sender<u64>,
}

/// One user-requested transfer. Cloning yields another handle to the same entity.
#[derive(Clone)]
pub struct Download {
    inner: Arc<Inner>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for Download {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Download {
    pub(crate) fn new(id: u64, source: Source, local_path: PathBuf, engine: Arc<Engine>) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                id,
                source,
                local_path,
                engine,
                state: Mutex::new(State {
                    size: None,
                    transferred: 0,
                    status: Status::Downloading,
                    last_error: None,
                    episode: 1,
                    cleared: false,
                }),
                worker: Mutex::new(None),
                finished,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn source(&self) -> &Source {
        &self.inner.source
    }

    pub fn local_path(&self) -> &Path {
        &self.inner.local_path
    }

    /// Source URL without credentials
    pub fn display_url(&self) -> &str {
        self.inner.source.display_url()
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn size(&self) -> Option<u64> {
        self.state().size
    }

    pub fn transferred(&self) -> u64 {
        self.state().transferred
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn progress(&self) -> Option<f64> {
        self.snapshot().progress()
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        self.snapshot_of(&state)
    }

    /// DOWNLOADING -> PAUSED
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state();
        if !state.status.can_pause() {
            return Err(self.illegal(&state, Command::Pause));
        }
        state.status = Status::Paused;
        log::info!("Paused download {} at {} bytes", self.inner.id, state.transferred);
        self.notify(&state);
        Ok(())
    }

    /// DOWNLOADING or PAUSED -> CANCELLED (sticky until cleared)
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.state();
        if !state.status.can_cancel() {
            return Err(self.illegal(&state, Command::Cancel));
        }
        state.status = Status::Cancelled;
        log::info!("Cancelled download {}", self.inner.id);
        self.notify(&state);
        Ok(())
    }

    /// PAUSED or ERROR -> DOWNLOADING, starting a fresh worker episode.
    ///
    /// The new worker waits for the previous one to exit before it touches
    /// the network or the local file.
    pub fn resume(&self) -> Result<()> {
        let mut worker = self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let episode = {
            let mut state = self.state();
            if state.cleared || !state.status.can_resume() {
                return Err(self.illegal(&state, Command::Resume));
            }
            state.status = Status::Downloading;
            state.last_error = None;
            state.episode += 1;
            log::info!(
                "Resuming download {} from {} bytes",
                self.inner.id,
                state.transferred
            );
            self.notify(&state);
            state.episode
        };

        let previous = worker.take();
        *worker = Some(tokio::spawn(worker::run(self.clone(), episode, previous)));
        Ok(())
    }

    /// Wait until the worker of the current episode has exited
    pub async fn settle(&self) {
        let target = self.state().episode;
        let mut finished = self.inner.finished.subscribe();
        let _ = finished.wait_for(|done| *done >= target).await;
    }

    /// Start the first episode; called once by the `Downloader` on submit
    pub(crate) fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let episode = self.state().episode;
        *worker = Some(tokio::spawn(worker::run(self.clone(), episode, None)));
    }

    /// Mark as removed from the visible set; only allowed in a terminal status
    pub(crate) fn mark_cleared(&self) -> Result<()> {
        let mut state = self.state();
        if state.cleared || !state.status.can_clear() {
            return Err(self.illegal(&state, Command::Clear));
        }
        state.cleared = true;
        Ok(())
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// True while `episode` is current and still DOWNLOADING
    pub(crate) fn is_active(&self, episode: u64) -> bool {
        let state = self.state();
        state.episode == episode && state.status == Status::Downloading
    }

    /// Record the remote size the first time it is learned
    pub(crate) fn record_size(&self, episode: u64, remote_size: u64) -> Result<u64> {
        let mut state = self.state();
        match state.size {
            Some(size) if size != remote_size => Err(Error::Metadata(format!(
                "remote size changed from {size} to {remote_size} bytes"
            ))),
            Some(size) => Ok(size),
            None => {
                if state.episode == episode && state.status == Status::Downloading {
                    state.size = Some(remote_size);
                    self.notify(&state);
                }
                Ok(remote_size)
            }
        }
    }

    /// Set `transferred` to the byte count now on disk
    pub(crate) fn set_transferred(&self, episode: u64, transferred: u64) {
        let mut state = self.state();
        if state.episode != episode || state.transferred == transferred {
            return;
        }
        state.transferred = transferred;
        if state.status != Status::Cancelled {
            self.notify(&state);
        }
    }

    /// DOWNLOADING -> COMPLETE, unless a command got there first
    pub(crate) fn complete(&self, episode: u64, transferred: u64) {
        let mut state = self.state();
        if state.episode != episode || state.status != Status::Downloading {
            return;
        }
        state.transferred = transferred;
        state.status = Status::Complete;
        self.notify(&state);
    }

    /// DOWNLOADING -> ERROR, reporting the message to the error surface
    pub(crate) fn fail(&self, episode: u64, err: &Error) {
        let snapshot = {
            let mut state = self.state();
            if state.episode != episode || state.status != Status::Downloading {
                log::debug!("Ignoring failure of stale episode {episode}: {err}");
                return;
            }
            state.status = Status::Error;
            state.last_error = Some(err.to_string());
            self.notify(&state);
            self.snapshot_of(&state)
        };

        log::error!("Download {} ({}) failed: {err}", self.inner.id, self.display_url());
        if let Some(reporter) = &self.inner.engine.reporter {
            reporter(&snapshot, &err.to_string());
        }
    }

    /// Called exactly once by every worker on exit
    pub(crate) fn episode_finished(&self, episode: u64) {
        self.inner.finished.send_modify(|done| *done = (*done).max(episode));
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, state: &State) -> Snapshot {
        Snapshot {
            id: self.inner.id,
            url: self.display_url().to_string(),
            protocol: self.inner.source.protocol,
            local_path: self.inner.local_path.clone(),
            size: state.size,
            transferred: state.transferred,
            status: state.status,
            last_error: state.last_error.clone(),
        }
    }

    // Runs under the state lock so notifications leave in mutation order.
    fn notify(&self, state: &State) {
        self.inner.engine.hub.notify(self, self.snapshot_of(state));
    }

    fn illegal(&self, state: &State, command: Command) -> Error {
        log::debug!(
            "Rejected {command} on download {} in status {}",
            self.inner.id,
            state.status
        );
        Error::IllegalTransition {
            status: state.status,
            command,
        }
    }
}
