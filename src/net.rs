use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};

use crate::error::{FetchError, LinkError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub address: String,
    pub signal_level: i32,
}

/// Network association below the broker session.
#[allow(async_fn_in_trait)]
pub trait Link {
    async fn associate(&mut self) -> Result<LinkInfo, LinkError>;
}

/// Host network stack. Association succeeds when the broker resolves and the
/// kernel has a route to it; the local address of that route is reported.
pub struct HostLink {
    host: String,
    port: u16,
}

impl HostLink {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl Link for HostLink {
    async fn associate(&mut self) -> Result<LinkInfo, LinkError> {
        let target = format!("{}:{}", self.host, self.port);
        let addr = lookup_host(&target)
            .await
            .map_err(|source| LinkError::Resolve {
                host: target.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| LinkError::NoRoute(target.clone()))?;

        let local = local_address_towards(addr)
            .await
            .map_err(|_| LinkError::NoRoute(target.clone()))?;

        log_link(&local);
        // wired hosts have no radio
        Ok(LinkInfo {
            address: local.ip().to_string(),
            signal_level: 0,
        })
    }
}

// Connecting a UDP socket only selects a route; nothing is sent.
async fn local_address_towards(addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;
    socket.local_addr()
}

fn log_link(local: &SocketAddr) {
    tracing::info!(ip = %local.ip(), "Link established");
}

/// Result of opening a firmware download.
pub struct FirmwareResponse<B> {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: B,
}

#[allow(async_fn_in_trait)]
pub trait FirmwareBody {
    /// Next piece of the body, `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError>;
}

#[allow(async_fn_in_trait)]
pub trait FirmwareSource {
    type Body: FirmwareBody;

    async fn fetch(&self, url: &str) -> Result<FirmwareResponse<Self::Body>, FetchError>;
}

pub struct HttpFirmwareSource {
    client: Client,
}

impl HttpFirmwareSource {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }
}

impl FirmwareSource for HttpFirmwareSource {
    type Body = HttpBody;

    async fn fetch(&self, url: &str) -> Result<FirmwareResponse<HttpBody>, FetchError> {
        tracing::info!("Downloading firmware from {}", url);
        let response = self.client.get(url).send().await?;
        Ok(FirmwareResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: HttpBody(response),
        })
    }
}

pub struct HttpBody(reqwest::Response);

impl FirmwareBody for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        Ok(self.0.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}
