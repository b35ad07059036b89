//! HTTP connector: HEAD for the size, `Range: bytes=<offset>-` for the stream

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder, StatusCode};

use crate::core::connector::{Connector, Session};
use crate::core::error::{Error, Result};
use crate::core::source::Source;
use crate::core::stream::{DownloadStream, create_http_stream};

/// Global HTTP client shared by all sessions
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("trident-dl/{}", env!("CARGO_PKG_VERSION")))
        // Sizes and Range offsets refer to the stored bytes, never a decoded body.
        .no_gzip()
        .no_brotli()
        .build()
        .unwrap_or_else(|e| {
            log::warn!("Falling back to default HTTP client: {e}");
            Client::new()
        })
});

#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self {
            client: GLOBAL_CLIENT.clone(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, source: &Source) -> Result<Box<dyn Session>> {
        // HTTP has no session handshake; the first request surfaces DNS/socket failures.
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            url: source.request_url().to_string(),
        }))
    }
}

struct HttpSession {
    client: Client,
    url: String,
}

#[async_trait]
impl Session for HttpSession {
    async fn fetch_size(&mut self, _path: &str) -> Result<u64> {
        let response = self.client.head(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Metadata(format!(
                "HEAD {} returned {}",
                self.url,
                response.status()
            )));
        }

        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| Error::Metadata(format!("{} did not report a content length", self.url)))
    }

    async fn open_stream(&mut self, _path: &str, offset: u64) -> Result<DownloadStream> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={offset}-"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Metadata(format!("GET {} returned {status}", self.url)));
        }
        if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::Transfer(format!(
                "cannot resume at byte {offset}: server does not support byte ranges ({status})"
            )));
        }

        Ok(create_http_stream(response))
    }

    async fn close(&mut self) {}
}
