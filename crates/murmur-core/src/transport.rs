//! Outbound HTTP over the overlay networks.
//!
//! `i2p://` endpoints go through the I2P HTTP proxy, `tor://` through the Tor
//! SOCKS proxy and `local://` directly. Every request carries
//! `application/octet-stream` and only a `200` counts as success.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use murmur_shared::{Endpoint, Scheme};
use reqwest::{header, Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::error::TransportError;

const OCTET_STREAM: &str = "application/octet-stream";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a sealed envelope.
    async fn post(&self, endpoint: &Endpoint, body: Vec<u8>) -> Result<(), TransportError>;

    /// GET a small resource, e.g. a peer profile.
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<u8>, TransportError>;

    /// Stream a remote file into `dest`, returning the number of bytes written.
    async fn download(&self, endpoint: &Endpoint, dest: &Path) -> Result<u64, TransportError>;
}

pub struct HttpTransport {
    direct: Client,
    i2p: Client,
    tor: Client,
    relay_timeout: Duration,
    discovery_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, TransportError> {
        Ok(Self {
            direct: build_client(None, config.discovery_timeout)?,
            i2p: build_client(Some(&config.i2p_proxy), config.discovery_timeout)?,
            tor: build_client(Some(&config.tor_proxy), config.discovery_timeout)?,
            relay_timeout: config.relay_timeout,
            discovery_timeout: config.discovery_timeout,
            idle_timeout: config.download_idle_timeout,
        })
    }

    fn route(&self, endpoint: &Endpoint) -> Result<(&Client, String), TransportError> {
        let url = endpoint
            .http_url()
            .ok_or_else(|| TransportError::Undeliverable(endpoint.to_string()))?;
        let client = match endpoint.scheme() {
            Some(Scheme::Local) => &self.direct,
            Some(Scheme::I2p) => &self.i2p,
            Some(Scheme::Tor) => &self.tor,
            None => return Err(TransportError::Undeliverable(endpoint.to_string())),
        };
        Ok((client, url))
    }

    /// Copy the body into `path`, failing when the peer goes quiet for
    /// longer than the idle timeout.
    async fn stream_to(&self, resp: reqwest::Response, path: &Path) -> Result<u64, TransportError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        loop {
            let next = timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| TransportError::Timeout(self.idle_timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn build_client(proxy: Option<&str>, connect_timeout: Duration) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .user_agent(concat!("murmur/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| TransportError::Proxy(e.to_string()))?;
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }
    Ok(builder.build()?)
}

fn ensure_ok(status: StatusCode) -> Result<(), TransportError> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &Endpoint, body: Vec<u8>) -> Result<(), TransportError> {
        let (client, url) = self.route(endpoint)?;
        let resp = client
            .post(&url)
            .header(header::CONTENT_TYPE, OCTET_STREAM)
            .timeout(self.relay_timeout)
            .body(body)
            .send()
            .await?;
        ensure_ok(resp.status())?;
        tracing::debug!(url = %url, "Delivered envelope");
        Ok(())
    }

    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<u8>, TransportError> {
        let (client, url) = self.route(endpoint)?;
        let resp = client
            .get(&url)
            .header(header::CONTENT_TYPE, OCTET_STREAM)
            .timeout(self.discovery_timeout)
            .send()
            .await?;
        ensure_ok(resp.status())?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn download(&self, endpoint: &Endpoint, dest: &Path) -> Result<u64, TransportError> {
        let (client, url) = self.route(endpoint)?;
        let resp = timeout(
            self.idle_timeout,
            client
                .get(&url)
                .header(header::CONTENT_TYPE, OCTET_STREAM)
                .send(),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.idle_timeout))??;
        ensure_ok(resp.status())?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Partial content lives in `<dest>.part` until the stream completes.
        let partial = dest.with_extension("part");
        let written = match self.stream_to(resp, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, dest).await?;

        tracing::debug!(url = %url, bytes = written, "Downloaded file");
        Ok(written)
    }
}
