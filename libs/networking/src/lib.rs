//! Networking utilities for cns.
//!
//! This library provides helpers for:
//! - Listen address normalization (`:80` style addresses)
//! - Socket options on accepted and listening sockets (keepalive, TCP Fast Open)
//! - The SOCKS-style address codec used inside tunnel frames

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::AsFd;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Invalid listen or target address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Not enough bytes to decode an address yet.
    #[error("incomplete address: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// Unknown address type byte.
    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Option not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Socket option call failed.
    #[error("socket option failed: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Listen Addresses
// ============================================================================

/// Normalize a listen address into something `lookup_host` accepts.
///
/// An empty host (`":80"`) means every IPv4 interface. Bracketed IPv6 hosts
/// are passed through unchanged.
pub fn normalize_listen_addr(addr: &str) -> Result<String, SocketError> {
    let addr = addr.trim();
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(SocketError::InvalidAddress(format!(
            "missing ':port' in {:?}",
            addr
        )));
    };

    if port.parse::<u16>().is_err() {
        return Err(SocketError::InvalidAddress(format!(
            "invalid port {:?} in {:?}",
            port, addr
        )));
    }

    if host.is_empty() {
        return Ok(format!("0.0.0.0:{}", port));
    }

    Ok(format!("{}:{}", host, port))
}

// ============================================================================
// Socket Options
// ============================================================================

/// Default TCP Fast Open queue length for listeners.
pub const DEFAULT_FAST_OPEN_QUEUE: i32 = 256;

/// Enable TCP keepalive with the given idle period.
#[cfg(unix)]
pub fn set_keepalive<S: AsFd>(socket: &S, period: Duration) -> Result<(), SocketError> {
    let sock = SockRef::from(socket);
    let keepalive = TcpKeepalive::new().with_time(period);
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// Enable TCP Fast Open on a listening socket.
#[cfg(target_os = "linux")]
pub fn enable_fast_open<S: AsFd>(listener: &S, queue_len: i32) -> Result<(), SocketError> {
    use std::os::fd::AsRawFd;

    let fd = listener.as_fd().as_raw_fd();
    // SAFETY: `fd` is borrowed from a live socket and the option value is an
    // `i32` on the stack whose size is passed alongside it.
    let r = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN,
            &queue_len as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if r != 0 {
        return Err(SocketError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Enable TCP Fast Open on a listening socket.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn enable_fast_open<S: AsFd>(_listener: &S, _queue_len: i32) -> Result<(), SocketError> {
    Err(SocketError::Unsupported("TCP_FASTOPEN"))
}

// ============================================================================
// Tunnel Address Codec
// ============================================================================

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Destination carried in a tunnel frame.
///
/// Wire layout (SOCKS5 style):
/// - `0x01` + 4-byte IPv4 + 2-byte port
/// - `0x03` + 1-byte length + domain + 2-byte port
/// - `0x04` + 16-byte IPv6 + 2-byte port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    /// Decode an address from the start of `buf`.
    ///
    /// Returns the address and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), SocketError> {
        let Some(&atyp) = buf.first() else {
            return Err(SocketError::Incomplete {
                needed: 1,
                available: 0,
            });
        };

        let need = |needed: usize| -> Result<(), SocketError> {
            if buf.len() < needed {
                Err(SocketError::Incomplete {
                    needed,
                    available: buf.len(),
                })
            } else {
                Ok(())
            }
        };

        match atyp {
            ATYP_IPV4 => {
                need(7)?;
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok((Self::Ip(SocketAddr::new(IpAddr::V4(ip), port)), 7))
            }
            ATYP_IPV6 => {
                need(19)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                Ok((
                    Self::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)),
                    19,
                ))
            }
            ATYP_DOMAIN => {
                need(2)?;
                let len = buf[1] as usize;
                need(2 + len + 2)?;
                let domain = std::str::from_utf8(&buf[2..2 + len])
                    .map_err(|_| SocketError::InvalidAddress("domain is not UTF-8".to_string()))?;
                let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
                Ok((Self::Domain(domain.to_string(), port), 4 + len))
            }
            other => Err(SocketError::UnsupportedAddressType(other)),
        }
    }

    /// Append the wire form of this address to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Ip(SocketAddr::V4(v4)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&v4.ip().octets());
                out.extend_from_slice(&v4.port().to_be_bytes());
            }
            Self::Ip(SocketAddr::V6(v6)) => {
                // Mapped addresses go back out as plain IPv4
                if let Some(v4) = v6.ip().to_ipv4_mapped() {
                    out.push(ATYP_IPV4);
                    out.extend_from_slice(&v4.octets());
                } else {
                    out.push(ATYP_IPV6);
                    out.extend_from_slice(&v6.ip().octets());
                }
                out.extend_from_slice(&v6.port().to_be_bytes());
            }
            Self::Domain(domain, port) => {
                let name = &domain.as_bytes()[..domain.len().min(u8::MAX as usize)];
                out.push(ATYP_DOMAIN);
                out.push(name.len() as u8);
                out.extend_from_slice(name);
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{}", addr),
            Self::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}
