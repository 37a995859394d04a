//! Hand-off contracts between the dispatcher and the tunnel relays.
//!
//! Every relay takes the client stream by value. Once a relay has been
//! called the dispatcher no longer owns the connection and cannot touch it
//! again; the HTTP-DNS responder is the only collaborator that may hand the
//! stream back, and only when it declines the request.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional client byte stream.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

/// Owned, type-erased client stream.
pub type BoxedStream = Box<dyn ClientStream>;

/// Relay for HTTP-disguised TCP tunnels.
#[async_trait]
pub trait TcpTunnel: Send + Sync {
    /// Serve the tunnel until either side closes.
    ///
    /// `header` holds the bytes of the request that selected this relay.
    /// They have already been consumed from the stream.
    async fn serve(&self, stream: BoxedStream, header: Vec<u8>) -> io::Result<()>;
}

/// Relay for raw UDP-over-TCP tunnels.
#[async_trait]
pub trait UdpTunnel: Send + Sync {
    /// Serve the tunnel until it goes idle or either side closes.
    ///
    /// `initial` holds the first tunnel bytes, already read off the stream.
    async fn serve(&self, stream: BoxedStream, initial: Vec<u8>) -> io::Result<()>;
}

/// Result of offering a request to the HTTP-DNS responder.
pub enum Claim {
    /// The responder answered and disposed of the connection.
    Handled,
    /// Not an HTTP-DNS request; the stream is returned untouched.
    Declined(BoxedStream),
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Handled => f.write_str("Handled"),
            Claim::Declined(_) => f.write_str("Declined(..)"),
        }
    }
}

/// Responder for HTTP-DNS queries.
#[async_trait]
pub trait HttpDnsResponder: Send + Sync {
    async fn respond(&self, stream: BoxedStream, request: &[u8]) -> Claim;
}

/// The set of relays a dispatcher hands connections to.
#[derive(Clone)]
pub struct Relays {
    pub tcp: Arc<dyn TcpTunnel>,
    pub udp: Arc<dyn UdpTunnel>,
    pub httpdns: Arc<dyn HttpDnsResponder>,
}
