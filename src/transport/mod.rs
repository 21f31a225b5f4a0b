//! # Transport Client
//!
//! Request/response exchange with the collection service.
//!
//! Every call opens a fresh TCP connection, resolving the host by name each
//! time. There is no pooling and no connection reuse.

pub mod protocol;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::config::EndpointConfig;
use crate::error::{CourierError, Result};

/// Size of a single socket read
const READ_CHUNK_SIZE: usize = 1024;

/// Exchange with the collection service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Send a read request and return the raw response
    async fn fetch(&mut self, path: &str) -> Result<String>;

    /// Send the bundle content as a write request and return the raw response
    async fn push(&mut self, path: &str, bundle: &Bundle) -> Result<String>;
}

/// Transport over plain TCP speaking the minimal request dialect
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    protocol_version: String,
    max_response_size: usize,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_version: protocol::DEFAULT_PROTOCOL_VERSION.to_string(),
            max_response_size: 8192,
        }
    }

    pub fn from_config(config: &EndpointConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            protocol_version: config.protocol_version.clone(),
            max_response_size: config.max_response_size,
        }
    }

    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Connect, send one request and collect the response
    async fn exchange(&self, request: &[u8]) -> Result<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                CourierError::Transport(format!(
                    "Failed to connect to {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;

        stream
            .write_all(request)
            .await
            .map_err(|e| CourierError::Transport(format!("Failed to send request: {}", e)))?;

        let response = self.read_response(&mut stream).await;
        let response = String::from_utf8_lossy(&response).into_owned();

        info!("Response: {}", response);
        Ok(response)
    }

    /// Read until the peer closes, the declared length arrives or the limit is hit
    ///
    /// A read error ends the response early; whatever arrived is kept.
    async fn read_response(&self, stream: &mut TcpStream) -> BytesMut {
        let mut response = BytesMut::with_capacity(self.max_response_size.min(READ_CHUNK_SIZE * 8));
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let remaining = self.max_response_size.saturating_sub(response.len());
            if remaining == 0 {
                warn!("Response truncated at {} bytes", self.max_response_size);
                break;
            }

            let want = remaining.min(chunk.len());
            match stream.read(&mut chunk[..want]).await {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if protocol::response_is_complete(&response) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read response: {}", e);
                    break;
                }
            }
        }

        debug!("Received {} response bytes", response.len());
        response
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn fetch(&mut self, path: &str) -> Result<String> {
        debug!("Fetching {} from {}:{}", path, self.host, self.port);
        self.exchange(&protocol::encode_fetch_request(path)).await
    }

    async fn push(&mut self, path: &str, bundle: &Bundle) -> Result<String> {
        info!(
            "Pushing {} records ({} bytes) to {}",
            bundle.record_count(),
            bundle.length(),
            path
        );
        let frame = protocol::encode_push_request(path, &self.protocol_version, bundle.content());
        self.exchange(&frame).await
    }
}
