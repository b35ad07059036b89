//! In-process connector serving objects from memory
//!
//! Handy for exercising the engine without a network: streams can be gated
//! chunk by chunk, and every opened offset is recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::core::connector::{Connector, Session};
use crate::core::error::{Error, Result};
use crate::core::source::Source;
use crate::core::stream::DownloadStream;

#[derive(Default)]
struct Shared {
    objects: Mutex<HashMap<String, Bytes>>,
    opened_offsets: Mutex<Vec<u64>>,
    bytes_served: AtomicU64,
    refuse_connections: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

/// Serves objects keyed by remote path
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
    chunk_size: usize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            chunk_size: 1024,
        }
    }

    /// Every chunk waits for a permit handed out by `release`
    pub fn gated() -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Default::default()
            }),
            chunk_size: 1024,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.shared
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), data.into());
    }

    /// Let `chunks` more chunks through a gated connector
    pub fn release(&self, chunks: usize) {
        if let Some(gate) = &self.shared.gate {
            gate.add_permits(chunks);
        }
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Offsets passed to `open_stream`, in call order
    pub fn opened_offsets(&self) -> Vec<u64> {
        self.shared
            .opened_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn bytes_served(&self) -> u64 {
        self.shared.bytes_served.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, source: &Source) -> Result<Box<dyn Session>> {
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!("{} refused the connection", source.host)));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Session for MemoryConnector {
    async fn fetch_size(&mut self, path: &str) -> Result<u64> {
        self.shared
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Error::Metadata(format!("{path} not found")))
    }

    async fn open_stream(&mut self, path: &str, offset: u64) -> Result<DownloadStream> {
        let data = self
            .shared
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Metadata(format!("{path} not found")))?;
        self.shared
            .opened_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(offset);

        let start = (offset as usize).min(data.len());
        let remaining = data.slice(start..);
        let chunk_size = self.chunk_size;
        let shared = Arc::clone(&self.shared);

        let chunks = futures::stream::unfold(remaining, move |mut rest| {
            let shared = Arc::clone(&shared);
            async move {
                if rest.is_empty() {
                    return None;
                }
                if let Some(gate) = &shared.gate {
                    gate.acquire().await.ok()?.forget();
                }
                let chunk = rest.split_to(chunk_size.min(rest.len()));
                shared.bytes_served.fetch_add(chunk.len() as u64, Ordering::SeqCst);
                Some((Ok::<Bytes, std::io::Error>(chunk), rest))
            }
        });

        Ok(DownloadStream::from_reader(tokio_util::io::StreamReader::new(
            Box::pin(chunks),
        )))
    }

    async fn close(&mut self) {}
}
