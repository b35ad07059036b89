//! FTP connector built on the blocking suppaftp client
//!
//! Binary transfer mode only. Resume uses `REST <offset>` before `RETR`.

use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::FtpStream;
use suppaftp::types::FileType;

use crate::core::connector::{Connector, PUMP_CHUNK_SIZE, Session, blocking};
use crate::core::error::{Error, Result};
use crate::core::source::Source;
use crate::core::stream::{DownloadStream, pump_reader};

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

#[derive(Debug, Clone)]
pub struct FtpConnector {
    default_port: u16,
    connect_timeout: Option<Duration>,
}

impl FtpConnector {
    pub fn new(default_port: u16, connect_timeout: Option<Duration>) -> Self {
        Self {
            default_port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(&self, source: &Source) -> Result<Box<dyn Session>> {
        let host = source.host.clone();
        let port = source.port.unwrap_or(self.default_port);
        let user = source.user.clone().unwrap_or_else(|| ANONYMOUS_USER.to_string());
        let password = source
            .password
            .clone()
            .unwrap_or_else(|| ANONYMOUS_PASSWORD.to_string());
        let timeout = self.connect_timeout;

        let stream = blocking(move || {
            let addr = (host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| Error::Connection(format!("cannot resolve {host}:{port}: {e}")))?
                .next()
                .ok_or_else(|| Error::Connection(format!("no address for {host}:{port}")))?;

            let mut ftp = match timeout {
                Some(limit) => FtpStream::connect_timeout(addr, limit)?,
                None => FtpStream::connect(addr)?,
            };
            ftp.login(&user, &password)
                .map_err(|e| Error::Connection(format!("login as {user} failed: {e}")))?;
            ftp.transfer_type(FileType::Binary)?;
            log::info!("Connected to FTP server {host}:{port}");
            Ok(ftp)
        })
        .await?;

        Ok(Box::new(FtpSession {
            ftp: Arc::new(Mutex::new(Some(stream))),
        }))
    }
}

/// Control connection; `None` once logged out
struct FtpSession {
    ftp: Arc<Mutex<Option<FtpStream>>>,
}

fn lock(ftp: &Mutex<Option<FtpStream>>) -> MutexGuard<'_, Option<FtpStream>> {
    ftp.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed() -> Error {
    Error::Connection("FTP session already closed".to_string())
}

#[async_trait]
impl Session for FtpSession {
    async fn fetch_size(&mut self, path: &str) -> Result<u64> {
        let ftp = Arc::clone(&self.ftp);
        let path = path.to_string();
        blocking(move || {
            let mut guard = lock(&ftp);
            let stream = guard.as_mut().ok_or_else(closed)?;
            stream
                .size(&path)
                .map(|size| size as u64)
                .map_err(|e| Error::Metadata(format!("SIZE {path} failed: {e}")))
        })
        .await
    }

    async fn open_stream(&mut self, path: &str, offset: u64) -> Result<DownloadStream> {
        let ftp = Arc::clone(&self.ftp);
        let path = path.to_string();
        let data = blocking(move || {
            let mut guard = lock(&ftp);
            let stream = guard.as_mut().ok_or_else(closed)?;
            if offset > 0 {
                stream.resume_transfer(offset as usize).map_err(|e| {
                    Error::Transfer(format!("REST {offset} rejected: {e}"))
                })?;
            }
            stream
                .retr_as_stream(&path)
                .map_err(|e| Error::Metadata(format!("RETR {path} failed: {e}")))
        })
        .await?;

        let ftp = Arc::clone(&self.ftp);
        Ok(pump_reader(data, PUMP_CHUNK_SIZE, move |data, completed| {
            if !completed {
                // Aborted mid-transfer; the session is closed right after.
                return;
            }
            if let Some(stream) = lock(&ftp).as_mut() {
                if let Err(e) = stream.finalize_retr_stream(data) {
                    log::warn!("FTP transfer did not finalize cleanly: {e}");
                }
            }
        }))
    }

    async fn close(&mut self) {
        let ftp = Arc::clone(&self.ftp);
        let result = blocking(move || {
            if let Some(mut stream) = lock(&ftp).take() {
                if let Err(e) = stream.quit() {
                    log::debug!("FTP logout failed: {e}");
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = result {
            log::debug!("FTP close failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let source = Source::parse("ftp://127.0.0.1:9/pub/file.bin").unwrap();
        let connector = FtpConnector::new(21, Some(Duration::from_secs(2)));
        let err = connector.connect(&source).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_connection_error() {
        let source = Source::parse("ftp://host.invalid/file.bin").unwrap();
        let connector = FtpConnector::new(21, Some(Duration::from_secs(2)));
        assert!(matches!(
            connector.connect(&source).await,
            Err(Error::Connection(_))
        ));
    }
}
