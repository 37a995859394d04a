//! Per-connection session dispatch.
//!
//! The dispatcher runs once per accepted connection:
//!
//! ```text
//! read -> classify -+- tunnel-like --------------------------> UDP relay
//!                   +- HTTP-like -> [HTTP-DNS] -> disguise -+- udp flag -> read again
//!                                                           +- otherwise -> TCP relay
//! ```
//!
//! The udp-flag path covers clients that finish the HTTP-looking handshake
//! first and only send tunnel bytes in a later segment. Each extra read
//! reuses the same buffer and is counted against `max_rereads`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::classifier::{classify, contains, Traffic};
use super::disguise::Disguise;
use super::handoff::{BoxedStream, Claim, Relays};

/// Read buffer size for the first (and any repeated) read.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default cap on reads that follow a udp-flag handshake.
pub const DEFAULT_MAX_REREADS: usize = 8;

/// Dispatcher settings, derived once from the process configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Marker that sends an HTTP-like connection back for another read.
    /// Empty disables the re-read path.
    pub udp_flag: Vec<u8>,
    /// Offer HTTP-like requests to the HTTP-DNS responder first.
    pub enable_httpdns: bool,
    /// Maximum number of extra reads per connection.
    pub max_rereads: usize,
    /// Size of the per-connection read buffer.
    pub buffer_size: usize,
}

impl DispatchSettings {
    pub fn new(udp_flag: impl Into<Vec<u8>>) -> Self {
        Self {
            udp_flag: udp_flag.into(),
            enable_httpdns: true,
            max_rereads: DEFAULT_MAX_REREADS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Why a session was closed without a hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent nothing before closing.
    Eof,
    /// Read returned an error.
    ReadFailed,
    /// Writing the disguise response failed.
    WriteFailed,
    /// Too many udp-flag handshakes on one connection.
    RereadLimit,
}

/// Terminal state of a dispatched session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Closed(CloseReason),
    HttpDnsHandled,
    TcpTunnel,
    UdpTunnel,
}

/// Classifies connections and hands them to the right relay.
pub struct Dispatcher {
    settings: DispatchSettings,
    relays: Relays,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, relays: Relays) -> Self {
        Self { settings, relays }
    }

    /// Run the session state machine on a freshly accepted stream.
    ///
    /// Dropping the stream closes the connection, so every early return
    /// that still owns it closes it.
    pub async fn dispatch(&self, mut stream: BoxedStream) -> SessionOutcome {
        let mut buffer = vec![0u8; self.settings.buffer_size];
        let mut rereads = 0usize;

        loop {
            let n = match stream.read(&mut buffer).await {
                Ok(0) => {
                    debug!("Peer closed before sending data");
                    return SessionOutcome::Closed(CloseReason::Eof);
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Read failed");
                    return SessionOutcome::Closed(CloseReason::ReadFailed);
                }
            };
            let payload = &buffer[..n];

            if classify(payload) == Traffic::TunnelLike {
                debug!(bytes = n, "Raw tunnel traffic, handing off to UDP relay");
                buffer.truncate(n);
                if let Err(e) = self.relays.udp.serve(stream, buffer).await {
                    debug!(error = %e, "UDP relay ended with error");
                }
                return SessionOutcome::UdpTunnel;
            }

            if self.settings.enable_httpdns {
                match self.relays.httpdns.respond(stream, payload).await {
                    Claim::Handled => {
                        debug!("Request answered by HTTP-DNS");
                        return SessionOutcome::HttpDnsHandled;
                    }
                    Claim::Declined(returned) => stream = returned,
                }
            }

            let disguise = Disguise::for_request(payload);
            if let Err(e) = stream.write_all(disguise.as_bytes()).await {
                debug!(error = %e, ?disguise, "Disguise response write failed");
                return SessionOutcome::Closed(CloseReason::WriteFailed);
            }
            debug!(?disguise, "Disguise response sent");

            if !self.settings.udp_flag.is_empty() && contains(payload, &self.settings.udp_flag) {
                if rereads >= self.settings.max_rereads {
                    warn!(
                        rereads,
                        max_rereads = self.settings.max_rereads,
                        "Re-read limit reached, closing connection"
                    );
                    return SessionOutcome::Closed(CloseReason::RereadLimit);
                }
                rereads += 1;
                debug!(rereads, "udp flag present, waiting for tunnel payload");
                continue;
            }

            debug!(bytes = n, "Handing off to TCP relay");
            buffer.truncate(n);
            if let Err(e) = self.relays.tcp.serve(stream, buffer).await {
                debug!(error = %e, "TCP relay ended with error");
            }
            return SessionOutcome::TcpTunnel;
        }
    }
}
