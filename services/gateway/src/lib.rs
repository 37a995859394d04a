pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gateway;
pub mod tunnel;

pub use config::Config;
pub use error::GatewayError;
pub use gateway::{
    classify, response_for, Acceptor, BoxedStream, Claim, CloseReason, DispatchSettings,
    Dispatcher, Gateway, GatewayConfig, GatewayStats, HttpDnsResponder, Relays, SessionOutcome,
    TcpAcceptor, TcpTunnel, Traffic, UdpTunnel,
};
pub use tunnel::{CipherKey, FramedUdpTunnel, HeaderTcpTunnel, HttpDnsServer, TunnelSettings};
