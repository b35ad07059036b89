//! SFTP connector built on the blocking ssh2 client
//!
//! Password authentication only. Host keys are not verified, matching the
//! `StrictHostKeyChecking=no` deployments this tool is used against.

use std::io::{Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Sftp;

use crate::core::connector::{Connector, PUMP_CHUNK_SIZE, Session, blocking};
use crate::core::error::{Error, Result};
use crate::core::source::Source;
use crate::core::stream::{DownloadStream, pump_reader};

#[derive(Debug, Clone)]
pub struct SftpConnector {
    default_port: u16,
    timeout: Option<Duration>,
}

impl SftpConnector {
    pub fn new(default_port: u16, timeout: Option<Duration>) -> Self {
        Self {
            default_port,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self, source: &Source) -> Result<Box<dyn Session>> {
        let host = source.host.clone();
        let port = source.port.unwrap_or(self.default_port);
        let user = source
            .user
            .clone()
            .ok_or_else(|| Error::Connection(format!("sftp://{host} needs a user name")))?;
        let password = source.password.clone().unwrap_or_default();
        let timeout = self.timeout;

        let link = blocking(move || {
            let addr = (host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| Error::Connection(format!("cannot resolve {host}:{port}: {e}")))?
                .next()
                .ok_or_else(|| Error::Connection(format!("no address for {host}:{port}")))?;

            let tcp = match timeout {
                Some(limit) => TcpStream::connect_timeout(&addr, limit),
                None => TcpStream::connect(addr),
            }
            .map_err(|e| Error::Connection(format!("cannot reach {host}:{port}: {e}")))?;

            let mut session = ssh2::Session::new()?;
            if let Some(limit) = timeout {
                session.set_timeout(limit.as_millis().min(u32::MAX as u128) as u32);
            }
            session.set_tcp_stream(tcp);
            session.handshake()?;
            session
                .userauth_password(&user, &password)
                .map_err(|e| Error::Connection(format!("authentication as {user} failed: {e}")))?;
            if !session.authenticated() {
                return Err(Error::Connection(format!("authentication as {user} failed")));
            }

            let sftp = session.sftp()?;
            log::info!("Connected to SFTP server {host}:{port} as {user}");
            Ok(SftpLink { session, sftp })
        })
        .await?;

        Ok(Box::new(SftpSession {
            link: Arc::new(Mutex::new(Some(link))),
        }))
    }
}

struct SftpLink {
    session: ssh2::Session,
    sftp: Sftp,
}

struct SftpSession {
    link: Arc<Mutex<Option<SftpLink>>>,
}

fn lock(link: &Mutex<Option<SftpLink>>) -> MutexGuard<'_, Option<SftpLink>> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed() -> Error {
    Error::Connection("SFTP session already closed".to_string())
}

/// Move a freshly opened remote file to `offset`
fn positioned<R: Seek>(mut file: R, offset: u64) -> Result<R> {
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Transfer(format!("seek to {offset} failed: {e}")))?;
    }
    Ok(file)
}

#[async_trait]
impl Session for SftpSession {
    async fn fetch_size(&mut self, path: &str) -> Result<u64> {
        let link = Arc::clone(&self.link);
        let path = path.to_string();
        blocking(move || {
            let guard = lock(&link);
            let link = guard.as_ref().ok_or_else(closed)?;
            let stat = link
                .sftp
                .stat(Path::new(&path))
                .map_err(|e| Error::Metadata(format!("stat {path} failed: {e}")))?;
            stat.size
                .ok_or_else(|| Error::Metadata(format!("{path} has no size")))
        })
        .await
    }

    async fn open_stream(&mut self, path: &str, offset: u64) -> Result<DownloadStream> {
        let link = Arc::clone(&self.link);
        let path = path.to_string();
        let file = blocking(move || {
            let guard = lock(&link);
            let link = guard.as_ref().ok_or_else(closed)?;
            let file = link
                .sftp
                .open(Path::new(&path))
                .map_err(|e| Error::Metadata(format!("open {path} failed: {e}")))?;
            positioned(file, offset)
        })
        .await?;

        Ok(pump_reader(file, PUMP_CHUNK_SIZE, |_, _| {}))
    }

    async fn close(&mut self) {
        let link = Arc::clone(&self.link);
        let result = blocking(move || {
            if let Some(link) = lock(&link).take() {
                drop(link.sftp);
                if let Err(e) = link.session.disconnect(None, "transfer finished", None) {
                    log::debug!("SFTP disconnect failed: {e}");
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = result {
            log::debug!("SFTP close failed: {e}");
        }
    }
}
