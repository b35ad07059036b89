//! Streaming implementations for trident-dl
//!
//! Provides AsyncRead implementations for the different connectors. HTTP is
//! natively async; the FTP and SFTP clients are blocking, so their readers are
//! pumped from a blocking thread through a bounded channel.

use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::TryStreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Chunks buffered between a blocking reader and the worker
const PUMP_DEPTH: usize = 4;

/// A unified byte stream positioned at the requested offset
pub enum DownloadStream {
    /// HTTP stream using reqwest
    Http(Box<dyn AsyncRead + Send + Unpin>),
    /// Blocking reader pumped through a channel (FTP, SFTP)
    Pumped(Box<dyn AsyncRead + Send + Unpin>),
    /// Any other async reader
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl DownloadStream {
    pub fn from_reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        DownloadStream::Reader(Box::new(reader))
    }
}

impl AsyncRead for DownloadStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            DownloadStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            DownloadStream::Pumped(stream) => Pin::new(stream).poll_read(cx, buf),
            DownloadStream::Reader(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// Creates a DownloadStream from an HTTP response
pub fn create_http_stream(response: reqwest::Response) -> DownloadStream {
    let stream = Box::new(tokio_util::io::StreamReader::new(
        response.bytes_stream().map_err(std::io::Error::other),
    ));
    DownloadStream::Http(stream)
}

/// Pump a blocking reader into an async stream.
///
/// `finish` runs on the blocking thread once reading stops; its flag is true
/// only when the reader hit EOF and every chunk was handed to the consumer.
/// Dropping the returned stream makes the pump stop after its current read.
pub fn pump_reader<R, F>(mut reader: R, chunk_size: usize, finish: F) -> DownloadStream
where
    R: Read + Send + 'static,
    F: FnOnce(R, bool) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(PUMP_DEPTH);

    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; chunk_size.max(1)];
        let completed = loop {
            match reader.read(&mut buffer) {
                Ok(0) => break true,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buffer[..n]))).is_err() {
                        log::debug!("Stream consumer went away, stopping pump");
                        break false;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break false;
                }
            }
        };
        finish(reader, completed);
    });

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    DownloadStream::Pumped(Box::new(tokio_util::io::StreamReader::new(Box::pin(chunks))))
}
