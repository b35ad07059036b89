//! Protocol connectors
//!
//! A `Connector` opens a `Session`; a session answers size queries and opens
//! byte streams positioned at an absolute offset. Protocol differences stay
//! behind these two traits so the worker runs one algorithm for all of them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::source::{Protocol, Source};
use crate::core::stream::DownloadStream;

pub mod ftp;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod sftp;

pub use ftp::FtpConnector;
pub use http::HttpConnector;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryConnector;
pub use sftp::SftpConnector;

/// Chunk size used when pumping blocking readers
pub(crate) const PUMP_CHUNK_SIZE: usize = 64 * 1024;

/// Opens sessions for one protocol
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, source: &Source) -> Result<Box<dyn Session>>;
}

/// An open network session
#[async_trait]
pub trait Session: Send {
    /// Size in bytes of the remote object at `path`
    async fn fetch_size(&mut self, path: &str) -> Result<u64>;

    /// Stream whose first byte is byte `offset` of the remote object
    async fn open_stream(&mut self, path: &str, offset: u64) -> Result<DownloadStream>;

    /// Best-effort logout/disconnect; never fails
    async fn close(&mut self);
}

/// The connector used for each protocol
#[derive(Clone)]
pub struct Connectors {
    pub http: Arc<dyn Connector>,
    pub ftp: Arc<dyn Connector>,
    pub sftp: Arc<dyn Connector>,
}

impl Connectors {
    /// Real network connectors configured from `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: Arc::new(HttpConnector::new()),
            ftp: Arc::new(FtpConnector::new(config.ftp_port, config.io_timeout)),
            sftp: Arc::new(SftpConnector::new(config.sftp_port, config.io_timeout)),
        }
    }

    /// The same connector for every protocol
    pub fn uniform(connector: Arc<dyn Connector>) -> Self {
        Self {
            http: Arc::clone(&connector),
            ftp: Arc::clone(&connector),
            sftp: connector,
        }
    }

    pub fn for_protocol(&self, protocol: Protocol) -> Arc<dyn Connector> {
        match protocol {
            Protocol::Http => Arc::clone(&self.http),
            Protocol::Ftp => Arc::clone(&self.ftp),
            Protocol::Sftp => Arc::clone(&self.sftp),
        }
    }
}

impl Default for Connectors {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Run a blocking client call off the async runtime
pub(crate) async fn blocking<T, F>(call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| Error::Connection(format!("blocking client task failed: {e}")))?
}
