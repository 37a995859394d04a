//! Tunnel relays behind the dispatcher's hand-off contracts.
//!
//! - [`HeaderTcpTunnel`]: HTTP-disguised TCP tunnel, target taken from a
//!   request header
//! - [`FramedUdpTunnel`]: UDP datagrams framed over the TCP stream
//! - [`HttpDnsServer`]: answers `GET /d?dn=<name>` lookups
//! - DNS TCP-over-UDP conversion for tunnels that target port 53

mod cipher;
mod dns;
mod httpdns;
mod tcp;
mod udp;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use cns_networking::TargetAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::gateway::BoxedStream;

pub use cipher::{CipherKey, XorCipher};
pub use httpdns::{query_name, HttpDnsServer};
pub use tcp::HeaderTcpTunnel;
pub use udp::{decode_frame, encode_frame, FramedUdpTunnel};

/// Default connect timeout for upstream TCP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default idle timeout for UDP tunnels.
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every relay.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// Header marker preceding the TCP target, e.g. `"\nMeng: "`.
    pub proxy_key: Vec<u8>,
    /// Payload cipher; `None` when no password is configured.
    pub cipher: Option<CipherKey>,
    /// Idle timeout for UDP tunnels and DNS replies.
    pub udp_timeout: Duration,
    /// Serve TCP tunnels to port 53 by converting DNS-over-TCP to UDP.
    pub dns_tcp_over_udp: bool,
    /// Upstream TCP connect timeout.
    pub connect_timeout: Duration,
}

impl TunnelSettings {
    pub fn new(proxy_key_name: &str, password: &str) -> Self {
        Self {
            proxy_key: proxy_key_marker(proxy_key_name),
            cipher: CipherKey::from_password(password),
            udp_timeout: DEFAULT_UDP_TIMEOUT,
            dns_tcp_over_udp: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Header marker for a proxy key name: `"\n" + name + ": "`.
pub fn proxy_key_marker(name: &str) -> Vec<u8> {
    format!("\n{}: ", name).into_bytes()
}

/// Parse `host:port` (IPv6 hosts in brackets) into a target address.
pub fn parse_host_port(value: &str) -> Result<TargetAddr, GatewayError> {
    let value = value.trim();
    let Some((host, port)) = value.rsplit_once(':') else {
        return Err(GatewayError::InvalidTarget(format!(
            "missing port in {:?}",
            value
        )));
    };
    let port: u16 = port
        .parse()
        .map_err(|_| GatewayError::InvalidTarget(format!("invalid port in {:?}", value)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(GatewayError::InvalidTarget(format!(
            "missing host in {:?}",
            value
        )));
    }

    match host.parse::<IpAddr>() {
        Ok(ip) => Ok(TargetAddr::Ip(SocketAddr::new(ip, port))),
        Err(_) => Ok(TargetAddr::Domain(host.to_string(), port)),
    }
}

/// Resolve a target to its first socket address.
pub(crate) async fn resolve(target: &TargetAddr) -> Result<SocketAddr, GatewayError> {
    match target {
        TargetAddr::Ip(addr) => Ok(*addr),
        TargetAddr::Domain(host, port) => tokio::net::lookup_host((host.as_str(), *port))
            .await?
            .next()
            .ok_or_else(|| GatewayError::InvalidTarget(format!("{} did not resolve", target))),
    }
}

/// Relay data bidirectionally between the client and an upstream stream.
///
/// With a cipher key each direction gets its own keystream. Returns
/// (bytes_to_upstream, bytes_from_upstream).
pub(crate) async fn relay_bidirectional<U>(
    client: BoxedStream,
    upstream: U,
    cipher: Option<&CipherKey>,
) -> (u64, u64)
where
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut inbound = cipher.map(CipherKey::stream);
    let mut outbound = cipher.map(CipherKey::stream);

    let to_upstream = copy_ciphered(&mut client_read, &mut upstream_write, &mut inbound);
    let to_client = copy_ciphered(&mut upstream_read, &mut client_write, &mut outbound);

    let (up_result, down_result) = tokio::join!(to_upstream, to_client);

    // Return bytes transferred even if one direction errored
    (up_result.unwrap_or(0), down_result.unwrap_or(0))
}

async fn copy_ciphered<R, W>(
    reader: &mut R,
    writer: &mut W,
    cipher: &mut Option<XorCipher>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher::apply(cipher, &mut buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}
