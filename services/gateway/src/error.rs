//! Error types for the gateway.

use std::io;
use std::path::PathBuf;

use cns_networking::SocketError;
use thiserror::Error;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Listen address could not be parsed.
    #[error("listen address: {0}")]
    ListenAddr(#[from] SocketError),

    /// Listen address did not resolve or no resolved address could be bound.
    #[error("bind {addr} failed: {source}")]
    Bind { addr: String, source: io::Error },

    /// Request carries no tunnel target header.
    #[error("no {0:?} header in request")]
    MissingTarget(String),

    /// Tunnel target could not be decoded or resolved.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Upstream connect exceeded the connect timeout.
    #[error("connect to {target} timed out")]
    ConnectTimeout { target: String },

    /// UDP tunnel frame could not be decoded.
    #[error("malformed tunnel frame: {0}")]
    MalformedFrame(String),

    /// PID file could not be written.
    #[error("pid file {}: {source}", path.display())]
    PidFile { path: PathBuf, source: io::Error },

    /// Background relaunch failed.
    #[error("relaunch failed: {0}")]
    Relaunch(io::Error),

    /// System call error.
    #[error("syscall error: {0}")]
    Syscall(#[from] nix::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
