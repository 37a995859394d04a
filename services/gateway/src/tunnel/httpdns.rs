//! HTTP-DNS responder.
//!
//! Answers `GET /d?dn=<name>` with the resolved addresses as a plain-text
//! body, `;`-separated. IPv4 answers are preferred; IPv6 is returned only
//! when there is no IPv4 address. A failed lookup yields an empty body.

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::gateway::{BoxedStream, Claim, HttpDnsResponder, SERVER_SIGNATURE};

const QUERY_PREFIX: &[u8] = b"GET /d?dn=";

/// Extract the queried name from an HTTP-DNS request line.
pub fn query_name(request: &[u8]) -> Option<String> {
    let rest = request.strip_prefix(QUERY_PREFIX)?;
    let end = rest
        .iter()
        .position(|&b| matches!(b, b' ' | b'&' | b'\r' | b'\n'))
        .unwrap_or(rest.len());
    let name = std::str::from_utf8(&rest[..end]).ok()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// Build the full HTTP response for a lookup result.
fn build_response(addrs: &[IpAddr]) -> Vec<u8> {
    let v4: Vec<String> = addrs
        .iter()
        .filter(|ip| ip.is_ipv4())
        .map(ToString::to_string)
        .collect();
    let body = if v4.is_empty() {
        addrs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    } else {
        v4.join(";")
    };

    format!(
        "HTTP/1.0 200 OK\r\nConnection: close\r\nServer: {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        SERVER_SIGNATURE,
        body.len(),
        body
    )
    .into_bytes()
}

/// HTTP-DNS responder backed by the system resolver.
#[derive(Debug, Default)]
pub struct HttpDnsServer;

impl HttpDnsServer {
    pub fn new() -> Self {
        Self
    }

    async fn lookup(name: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => {
                let mut ips: Vec<IpAddr> = Vec::new();
                for addr in addrs {
                    if !ips.contains(&addr.ip()) {
                        ips.push(addr.ip());
                    }
                }
                ips
            }
            Err(e) => {
                debug!(name = %name, error = %e, "HTTP-DNS lookup failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl HttpDnsResponder for HttpDnsServer {
    async fn respond(&self, mut stream: BoxedStream, request: &[u8]) -> Claim {
        let Some(name) = query_name(request) else {
            return Claim::Declined(stream);
        };

        let addrs = Self::lookup(&name).await;
        debug!(name = %name, answers = addrs.len(), "HTTP-DNS query");

        let response = build_response(&addrs);
        if let Err(e) = stream.write_all(&response).await {
            debug!(error = %e, "HTTP-DNS response write failed");
        } else if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "HTTP-DNS shutdown failed");
        }
        Claim::Handled
    }
}
