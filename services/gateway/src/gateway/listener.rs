//! TCP listener and accept loop.
//!
//! One acceptor task owns the listener for the life of the process. Every
//! accepted connection gets keepalive configured and its own task running
//! the [`Dispatcher`]. There is no connection limit and no admission
//! control; accept errors are logged and retried after a fixed backoff.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};

use super::dispatcher::{Dispatcher, SessionOutcome};
use super::handoff::BoxedStream;

/// Sleep after a failed accept before trying again.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_secs(3);

/// Default keepalive period for accepted sockets.
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Source of accepted client connections.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> io::Result<(BoxedStream, SocketAddr)>;
}

/// Accepts from a bound TCP listener and applies keepalive.
pub struct TcpAcceptor {
    listener: TcpListener,
    keepalive: Duration,
}

impl TcpAcceptor {
    pub fn new(listener: TcpListener, keepalive: Duration) -> Self {
        Self {
            listener,
            keepalive,
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> io::Result<(BoxedStream, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        if let Err(e) = cns_networking::set_keepalive(&stream, self.keepalive) {
            warn!(peer_addr = %peer_addr, error = %e, "Failed to enable keepalive");
        }
        Ok((Box::new(stream), peer_addr))
    }
}

/// Statistics for the gateway.
#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently being dispatched or relayed.
    pub connections_active: AtomicU64,
    /// Failed accept calls.
    pub accept_errors: AtomicU64,
    /// Sessions closed before any hand-off.
    pub sessions_closed: AtomicU64,
    /// Sessions answered by the HTTP-DNS responder.
    pub httpdns_handled: AtomicU64,
    /// Sessions handed to the TCP relay.
    pub tcp_tunnels: AtomicU64,
    /// Sessions handed to the UDP relay.
    pub udp_tunnels: AtomicU64,
}

impl GatewayStats {
    fn record(&self, outcome: SessionOutcome) {
        let counter = match outcome {
            SessionOutcome::Closed(_) => &self.sessions_closed,
            SessionOutcome::HttpDnsHandled => &self.httpdns_handled,
            SessionOutcome::TcpTunnel => &self.tcp_tunnels,
            SessionOutcome::UdpTunnel => &self.udp_tunnels,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions that reached a terminal state.
    pub fn sessions_finished(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
            + self.httpdns_handled.load(Ordering::Relaxed)
            + self.tcp_tunnels.load(Ordering::Relaxed)
            + self.udp_tunnels.load(Ordering::Relaxed)
    }
}

/// Accept loop settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Sleep after a failed accept.
    pub accept_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

/// The accept loop: one acceptor, one task per connection.
pub struct Gateway<A> {
    config: GatewayConfig,
    acceptor: A,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<GatewayStats>,
}

impl<A: Acceptor> Gateway<A> {
    pub fn new(config: GatewayConfig, acceptor: A, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            acceptor,
            dispatcher,
            stats: Arc::new(GatewayStats::default()),
        }
    }

    /// Get gateway statistics.
    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    /// Run the accept loop. Never returns.
    pub async fn run(&self) {
        info!(
            accept_backoff_secs = self.config.accept_backoff.as_secs(),
            "Accept loop started"
        );

        loop {
            match self.acceptor.accept().await {
                Ok((stream, peer_addr)) => {
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            let outcome = dispatcher.dispatch(stream).await;
                            debug!(?outcome, "Session finished");

                            stats.record(outcome);
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(self.config.accept_backoff).await;
                }
            }
        }
    }
}
