//! HTTP-disguised TCP tunnel.
//!
//! The client's request carries the upstream target in a header named by
//! the proxy key (`Meng: host:port` by default). With a cipher configured
//! the header value is base64 of the ciphered `host:port` text, and the
//! relayed bytes are ciphered in both directions.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use cns_networking::TargetAddr;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{dns, parse_host_port, relay_bidirectional, resolve, TunnelSettings};
use crate::error::GatewayError;
use crate::gateway::{find, BoxedStream, TcpTunnel};

const DNS_PORT: u16 = 53;

/// TCP relay that finds its target in a request header.
pub struct HeaderTcpTunnel {
    settings: Arc<TunnelSettings>,
}

impl HeaderTcpTunnel {
    pub fn new(settings: Arc<TunnelSettings>) -> Self {
        Self { settings }
    }

    /// Extract the upstream target from the request header.
    pub fn target_from_header(&self, header: &[u8]) -> Result<TargetAddr, GatewayError> {
        let key = &self.settings.proxy_key;
        let start = find(header, key)
            .map(|pos| pos + key.len())
            .ok_or_else(|| {
                GatewayError::MissingTarget(String::from_utf8_lossy(key).trim().to_string())
            })?;

        let rest = &header[start..];
        let end = rest
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(rest.len());
        let raw = rest[..end].trim_ascii();

        let value = match &self.settings.cipher {
            Some(key) => {
                let mut decoded = base64::engine::general_purpose::STANDARD
                    .decode(raw)
                    .map_err(|e| GatewayError::InvalidTarget(format!("bad base64: {}", e)))?;
                key.apply_once(&mut decoded);
                String::from_utf8(decoded)
                    .map_err(|_| GatewayError::InvalidTarget("target is not UTF-8".to_string()))?
            }
            None => String::from_utf8(raw.to_vec())
                .map_err(|_| GatewayError::InvalidTarget("target is not UTF-8".to_string()))?,
        };

        parse_host_port(&value)
    }

    async fn run(&self, stream: BoxedStream, header: Vec<u8>) -> Result<(), GatewayError> {
        let target = self.target_from_header(&header)?;

        if target.port() == DNS_PORT && self.settings.dns_tcp_over_udp {
            debug!(target = %target, "DNS over TCP, converting to UDP");
            return dns::serve_tcp_over_udp(stream, &target, &self.settings).await;
        }

        let addr = resolve(&target).await?;
        let upstream = timeout(self.settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::ConnectTimeout {
                target: target.to_string(),
            })??;

        debug!(target = %target, upstream = %addr, "Connected to upstream");

        let (bytes_to_upstream, bytes_from_upstream) =
            relay_bidirectional(stream, upstream, self.settings.cipher.as_ref()).await;

        debug!(
            target = %target,
            bytes_to_upstream,
            bytes_from_upstream,
            "TCP tunnel closed"
        );
        Ok(())
    }
}

#[async_trait]
impl TcpTunnel for HeaderTcpTunnel {
    async fn serve(&self, stream: BoxedStream, header: Vec<u8>) -> io::Result<()> {
        self.run(stream, header).await.map_err(io::Error::other)
    }
}
