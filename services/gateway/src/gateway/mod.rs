//! Connection front-end: accept, classify, disguise, hand off.
//!
//! This module provides:
//! - The accept loop over a single TCP listener
//! - First-read classification (HTTP-like vs raw tunnel)
//! - Canned disguise responses
//! - The per-connection session dispatcher
//! - Hand-off contracts for the tunnel relays
//!
//! ## Architecture
//!
//! ```text
//! Client -> Gateway (accept) -> Dispatcher -> Classifier -+-> UDP relay
//!                                                         +-> HTTP-DNS responder
//!                                                         +-> Disguise -> TCP relay
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let relays = Relays { tcp, udp, httpdns };
//! let dispatcher = Arc::new(Dispatcher::new(DispatchSettings::new("httpUDP"), relays));
//! let acceptor = TcpAcceptor::new(TcpListener::bind("0.0.0.0:80").await?, keepalive);
//! Gateway::new(GatewayConfig::default(), acceptor, dispatcher).run().await;
//! ```

mod classifier;
mod disguise;
mod dispatcher;
mod handoff;
mod listener;

pub(crate) use classifier::find;
pub use classifier::{classify, is_http_like, Traffic, HTTP_PREFIXES};
pub use disguise::{
    response_for, Disguise, CHUNKED_OK, CONNECTION_ESTABLISHED, SERVER_SIGNATURE,
    WEBSOCKET_UPGRADE,
};
pub use dispatcher::{
    CloseReason, DispatchSettings, Dispatcher, SessionOutcome, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_REREADS,
};
pub use handoff::{
    BoxedStream, Claim, ClientStream, HttpDnsResponder, Relays, TcpTunnel, UdpTunnel,
};
pub use listener::{
    Acceptor, Gateway, GatewayConfig, GatewayStats, TcpAcceptor, DEFAULT_ACCEPT_BACKOFF,
    DEFAULT_TCP_KEEPALIVE,
};
