//! The download manager
//!
//! Owns the visible set of downloads in submission order and routes user
//! commands to them. Each submitted download runs on its own worker task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::config::Config;
use crate::core::connector::Connectors;
use crate::core::download::{Download, Snapshot, Status};
use crate::core::error::{Error, Result};
use crate::core::observer::{ErrorReporter, SubscriberId, Subscription};
use crate::core::source::Source;
use crate::core::space::{SpaceProbe, SystemSpace};
use crate::core::worker::Engine;

/// Builder for a `Downloader` with non-default collaborators
pub struct DownloaderBuilder {
    config: Config,
    connectors: Option<Connectors>,
    space: Option<Arc<dyn SpaceProbe>>,
    reporter: Option<ErrorReporter>,
}

impl DownloaderBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connectors: None,
            space: None,
            reporter: None,
        }
    }

    /// Replace the network connectors (defaults to `Connectors::from_config`)
    pub fn connectors(mut self, connectors: Connectors) -> Self {
        self.connectors = Some(connectors);
        self
    }

    /// Replace the free-space probe (defaults to `SystemSpace`)
    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = Some(probe);
        self
    }

    /// Receive the message of every ERROR transition
    pub fn on_error<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&Snapshot, &str) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn build(self) -> Downloader {
        let connectors = self
            .connectors
            .unwrap_or_else(|| Connectors::from_config(&self.config));
        let space = self.space.unwrap_or_else(|| Arc::new(SystemSpace));
        Downloader {
            engine: Arc::new(Engine::new(self.config, connectors, space, self.reporter)),
            downloads: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Manages concurrent, resumable downloads
pub struct Downloader {
    engine: Arc<Engine>,
    downloads: Mutex<Vec<Download>>,
    next_id: AtomicU64,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Create a new downloader with default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new downloader with custom configuration
    pub fn with_config(config: Config) -> Self {
        DownloaderBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> DownloaderBuilder {
        DownloaderBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    /// Validate `url` and start downloading it.
    ///
    /// Fails with `Error::InvalidSource` without creating anything when the
    /// URL is malformed or uses an unsupported scheme. Must be called from
    /// within a tokio runtime.
    pub fn submit(&self, url: &str) -> Result<Download> {
        let source = Source::parse(url)?;
        let local_path = source.local_path(&self.engine.config.base_dir);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let download = Download::new(id, source, local_path, Arc::clone(&self.engine));

        log::info!(
            "Submitted download {id}: {} -> {}",
            download.display_url(),
            download.local_path().display()
        );
        self.lock().push(download.clone());
        download.start();
        Ok(download)
    }

    pub fn get(&self, id: u64) -> Option<Download> {
        self.lock().iter().find(|d| d.id() == id).cloned()
    }

    /// Visible downloads in submission order
    pub fn list(&self) -> Vec<Download> {
        self.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.list().iter().map(Download::snapshot).collect()
    }

    pub fn pause(&self, id: u64) -> Result<()> {
        self.find(id)?.pause()
    }

    pub fn resume(&self, id: u64) -> Result<()> {
        self.find(id)?.resume()
    }

    pub fn cancel(&self, id: u64) -> Result<()> {
        self.find(id)?.cancel()
    }

    /// Remove a COMPLETE, CANCELLED or ERROR download from the visible set
    pub fn clear(&self, id: u64) -> Result<()> {
        let mut downloads = self.lock();
        let index = downloads
            .iter()
            .position(|d| d.id() == id)
            .ok_or(Error::NotFound(id))?;
        downloads[index].mark_cleared()?;
        let cleared = downloads.remove(index);
        log::info!("Cleared download {id} ({})", cleared.display_url());
        Ok(())
    }

    /// Pause every DOWNLOADING download; returns how many were paused
    pub fn pause_all(&self) -> usize {
        self.list()
            .iter()
            .filter(|d| d.status() == Status::Downloading)
            .filter(|d| d.pause().is_ok())
            .count()
    }

    /// Resume every PAUSED download; returns how many were resumed
    pub fn resume_all(&self) -> usize {
        self.list()
            .iter()
            .filter(|d| d.status() == Status::Paused)
            .filter(|d| d.resume().is_ok())
            .count()
    }

    /// Clear every download that allows it; returns the cleared ids
    pub fn clear_finished(&self) -> Vec<u64> {
        let mut downloads = self.lock();
        let mut cleared = Vec::new();
        downloads.retain(|d| {
            if d.mark_cleared().is_ok() {
                cleared.push(d.id());
                false
            } else {
                true
            }
        });
        if !cleared.is_empty() {
            log::info!("Cleared {} finished downloads", cleared.len());
        }
        cleared
    }

    /// Wait until no download has a worker running
    pub async fn settle(&self) {
        for download in self.list() {
            download.settle().await;
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.engine.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.engine.hub.unsubscribe(id)
    }

    fn find(&self, id: u64) -> Result<Download> {
        self.get(id).ok_or(Error::NotFound(id))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Download>> {
        self.downloads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
