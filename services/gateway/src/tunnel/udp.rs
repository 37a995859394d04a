//! UDP datagrams framed over a TCP stream.
//!
//! Frame layout, both directions:
//!
//! ```text
//! +--------+----------------------+-----------+
//! | len:u16| address (SOCKS5 form)| datagram  |
//! +--------+----------------------+-----------+
//! ```
//!
//! `len` is big-endian and counts the address and datagram. Client frames
//! name the destination; reply frames name the source. The tunnel ends on
//! client EOF, on a malformed frame, or after `udp_timeout` without traffic
//! in either direction.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use cns_networking::{SocketError, TargetAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{cipher, resolve, TunnelSettings};
use crate::error::GatewayError;
use crate::gateway::{BoxedStream, UdpTunnel};

const MAX_DATAGRAM: usize = 65536;

/// Decode one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` until a whole frame is buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<(TargetAddr, Bytes)>, GatewayError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Ok(None);
    }

    buf.advance(2);
    let mut frame = buf.split_to(len);
    let (addr, used) = TargetAddr::decode(&frame).map_err(|e| match e {
        SocketError::Incomplete { .. } => {
            GatewayError::MalformedFrame("address overruns frame".to_string())
        }
        other => GatewayError::MalformedFrame(other.to_string()),
    })?;
    frame.advance(used);
    Ok(Some((addr, frame.freeze())))
}

/// Encode a datagram into a frame.
pub fn encode_frame(addr: &TargetAddr, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut body = Vec::with_capacity(payload.len() + 19);
    addr.encode(&mut body);
    body.extend_from_slice(payload);

    let len = u16::try_from(body.len())
        .map_err(|_| GatewayError::MalformedFrame(format!("frame too large: {}", body.len())))?;

    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// UDP relay speaking the framed protocol above.
pub struct FramedUdpTunnel {
    settings: Arc<TunnelSettings>,
}

impl FramedUdpTunnel {
    pub fn new(settings: Arc<TunnelSettings>) -> Self {
        Self { settings }
    }

    async fn run(&self, stream: BoxedStream, initial: Vec<u8>) -> Result<(), GatewayError> {
        let (socket, dual_stack) = bind_relay_socket().await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let mut inbound = self.settings.cipher.as_ref().map(|key| key.stream());
        let mut outbound = self.settings.cipher.as_ref().map(|key| key.stream());

        let mut pending = BytesMut::from(&initial[..]);
        cipher::apply(&mut inbound, &mut pending);

        let mut read_buf = vec![0u8; 8192];
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        let (mut sent, mut received) = (0u64, 0u64);

        loop {
            while let Some((target, payload)) = decode_frame(&mut pending)? {
                let mut dest = resolve(&target).await?;
                if dual_stack {
                    if let SocketAddr::V4(v4) = dest {
                        dest = SocketAddr::new(v4.ip().to_ipv6_mapped().into(), v4.port());
                    }
                }
                socket.send_to(&payload, dest).await?;
                sent += 1;
            }

            tokio::select! {
                result = reader.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        break;
                    }
                    cipher::apply(&mut inbound, &mut read_buf[..n]);
                    pending.extend_from_slice(&read_buf[..n]);
                }
                result = socket.recv_from(&mut datagram) => {
                    let (n, from) = result?;
                    let mut frame = encode_frame(&TargetAddr::Ip(from), &datagram[..n])?;
                    cipher::apply(&mut outbound, &mut frame);
                    writer.write_all(&frame).await?;
                    received += 1;
                }
                _ = tokio::time::sleep(self.settings.udp_timeout) => {
                    debug!(timeout_secs = self.settings.udp_timeout.as_secs(), "UDP tunnel idle");
                    break;
                }
            }
        }

        debug!(datagrams_sent = sent, datagrams_received = received, "UDP tunnel closed");
        Ok(())
    }
}

/// Bind the relay socket, preferring a dual-stack IPv6 socket.
async fn bind_relay_socket() -> io::Result<(UdpSocket, bool)> {
    match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => Ok((socket, true)),
        Err(e) => {
            debug!(error = %e, "IPv6 UDP bind failed, falling back to IPv4");
            Ok((UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?, false))
        }
    }
}

#[async_trait]
impl UdpTunnel for FramedUdpTunnel {
    async fn serve(&self, stream: BoxedStream, initial: Vec<u8>) -> io::Result<()> {
        self.run(stream, initial).await.map_err(io::Error::other)
    }
}
