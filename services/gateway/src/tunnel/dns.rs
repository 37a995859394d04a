//! DNS-over-TCP to UDP conversion.
//!
//! Clients that tunnel DNS over TCP send RFC 1035 length-prefixed messages.
//! Each message is forwarded to the resolver as a plain UDP datagram and the
//! reply goes back length-prefixed.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use cns_networking::TargetAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use super::cipher;
use super::{resolve, TunnelSettings};
use crate::error::GatewayError;
use crate::gateway::BoxedStream;

const MAX_DNS_MESSAGE: usize = u16::MAX as usize;

pub(crate) async fn serve_tcp_over_udp(
    stream: BoxedStream,
    target: &TargetAddr,
    settings: &TunnelSettings,
) -> Result<(), GatewayError> {
    let server = resolve(target).await?;
    let bind_addr: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut inbound = settings.cipher.as_ref().map(|key| key.stream());
    let mut outbound = settings.cipher.as_ref().map(|key| key.stream());

    let mut reply = vec![0u8; MAX_DNS_MESSAGE];
    let mut answered = 0u64;

    loop {
        let mut len_buf = [0u8; 2];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        cipher::apply(&mut inbound, &mut len_buf);

        let len = u16::from_be_bytes(len_buf) as usize;
        let mut query = vec![0u8; len];
        reader.read_exact(&mut query).await?;
        cipher::apply(&mut inbound, &mut query);

        socket.send(&query).await?;
        let n = match timeout(settings.udp_timeout, socket.recv(&mut reply)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(server = %server, "DNS reply timed out");
                break;
            }
        };

        let mut out = Vec::with_capacity(n + 2);
        out.extend_from_slice(&(n as u16).to_be_bytes());
        out.extend_from_slice(&reply[..n]);
        cipher::apply(&mut outbound, &mut out);
        writer.write_all(&out).await?;
        answered += 1;
    }

    debug!(server = %server, answered, "DNS conversion finished");
    Ok(())
}
