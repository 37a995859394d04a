//! Gateway configuration.
//!
//! Parsed once at startup from command-line options and never mutated
//! afterwards. Runtime settings for the dispatcher and relays are derived
//! from it before the accept loop starts.

use std::path::Path;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::gateway::{
    DispatchSettings, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_REREADS, DEFAULT_TCP_KEEPALIVE,
};
use crate::tunnel::TunnelSettings;

const BANNER: &str = "cns - disguised tunnel front-end";

/// Gateway configuration (flag-driven).
#[derive(Debug, Clone, Parser)]
#[command(name = "cns", version, about = BANNER, long_about = None)]
#[command(args_override_self = true)]
pub struct Config {
    /// Header name carrying the TCP tunnel target.
    #[arg(long = "proxy-key", default_value = "Meng")]
    pub proxy_key: String,

    /// Marker that makes an HTTP-like connection read again before hand-off.
    #[arg(long = "udp-flag", default_value = "httpUDP")]
    pub udp_flag: String,

    /// Listen address; an empty host listens on every interface.
    #[arg(long = "listen-addr", default_value = ":80")]
    pub listen_addr: String,

    /// Tunnel cipher password; empty disables the cipher.
    #[arg(long = "encrypt-password", default_value = "quanyec")]
    pub encrypt_password: String,

    /// UDP tunnel idle timeout, in seconds.
    #[arg(long = "udp-timeout", default_value_t = 30)]
    pub udp_timeout_secs: u64,

    /// TCP keepalive period for accepted sockets, in seconds.
    #[arg(long = "tcp-keepalive", default_value_t = DEFAULT_TCP_KEEPALIVE.as_secs())]
    pub tcp_keepalive_secs: u64,

    /// File that receives the process id.
    #[arg(long = "pid-path")]
    pub pid_path: Option<String>,

    /// Serve DNS-over-TCP tunnels by converting queries to UDP.
    #[arg(
        long = "dns-tcpOverUdp",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub dns_tcp_over_udp: bool,

    /// Answer HTTP-DNS queries before sending a disguise response.
    #[arg(
        long = "enable-httpDNS",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub enable_httpdns: bool,

    /// Enable TCP Fast Open on the listener.
    #[arg(
        long = "enable-TFO",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub enable_tfo: bool,

    /// Relaunch in the background and exit.
    #[arg(
        long = "daemon",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub daemon: bool,

    /// Maximum extra reads after udp-flag handshakes on one connection.
    #[arg(long = "max-rereads", default_value_t = DEFAULT_MAX_REREADS)]
    pub max_rereads: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level", env = "CNS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout_secs)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }

    /// PID file path, if one is configured. An empty path disables it.
    pub fn pid_path(&self) -> Option<&Path> {
        self.pid_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(Path::new)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            udp_flag: self.udp_flag.as_bytes().to_vec(),
            enable_httpdns: self.enable_httpdns,
            max_rereads: self.max_rereads,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn tunnel_settings(&self) -> TunnelSettings {
        let mut settings = TunnelSettings::new(&self.proxy_key, &self.encrypt_password);
        settings.udp_timeout = self.udp_timeout();
        settings.dns_tcp_over_udp = self.dns_tcp_over_udp;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["cns"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.proxy_key, "Meng");
        assert_eq!(config.udp_flag, "httpUDP");
        assert_eq!(config.listen_addr, ":80");
        assert_eq!(config.encrypt_password, "quanyec");
        assert_eq!(config.udp_timeout(), Duration::from_secs(30));
        assert_eq!(config.tcp_keepalive(), DEFAULT_TCP_KEEPALIVE);
        assert_eq!(config.tcp_keepalive(), Duration::from_secs(60));
        assert!(config.pid_path().is_none());
        assert!(config.dns_tcp_over_udp);
        assert!(config.enable_httpdns);
        assert!(config.enable_tfo);
        assert!(config.daemon);
        assert_eq!(config.max_rereads, DEFAULT_MAX_REREADS);
    }

    #[test]
    fn test_bool_forms() {
        let config = parse(&["--daemon=false", "--enable-TFO=false", "--enable-httpDNS"]);
        assert!(!config.daemon);
        assert!(!config.enable_tfo);
        assert!(config.enable_httpdns);
    }

    #[test]
    fn test_last_value_wins() {
        let config = parse(&["--daemon", "--listen-addr", ":8080", "--daemon=false"]);
        assert!(!config.daemon);
        assert_eq!(config.listen_addr, ":8080");

        let config = parse(&["--udp-flag", "a", "--udp-flag", "b"]);
        assert_eq!(config.udp_flag, "b");
    }

    #[test]
    fn test_empty_pid_path_is_disabled() {
        let config = parse(&["--pid-path", ""]);
        assert!(config.pid_path().is_none());

        let config = parse(&["--pid-path", "/run/cns.pid"]);
        assert_eq!(config.pid_path(), Some(Path::new("/run/cns.pid")));
    }

    #[test]
    fn test_derived_settings() {
        let config = parse(&[
            "--proxy-key",
            "Host2",
            "--encrypt-password=",
            "--udp-timeout",
            "5",
            "--dns-tcpOverUdp=false",
            "--enable-httpDNS=false",
        ]);

        let dispatch = config.dispatch_settings();
        assert_eq!(dispatch.udp_flag, b"httpUDP".to_vec());
        assert!(!dispatch.enable_httpdns);
        assert_eq!(dispatch.buffer_size, 8192);

        let tunnel = config.tunnel_settings();
        assert_eq!(tunnel.proxy_key, b"\nHost2: ".to_vec());
        assert!(tunnel.cipher.is_none());
        assert_eq!(tunnel.udp_timeout, Duration::from_secs(5));
        assert!(!tunnel.dns_tcp_over_udp);
    }

    #[test]
    fn test_help_exits_cleanly() {
        let err = Config::try_parse_from(["cns", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }
}
