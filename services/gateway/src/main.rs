//! cns - disguised tunnel front-end
//!
//! A single TCP listener that:
//! - Classifies each connection by its first bytes (HTTP-like or raw tunnel)
//! - Answers HTTP-like connections with a canned HTTP/WebSocket response
//! - Hands connections to the TCP tunnel, UDP tunnel, or HTTP-DNS relay

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cns_gateway::bootstrap;
use cns_gateway::{
    Config, Dispatcher, FramedUdpTunnel, Gateway, GatewayConfig, HeaderTcpTunnel,
    HttpDnsServer, Relays, TcpAcceptor,
};

fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if config.daemon {
        return match bootstrap::relaunch_detached() {
            Ok(child_pid) => {
                info!(child_pid, "Relaunched in background");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Failed to relaunch in background");
                ExitCode::from(1)
            }
        };
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Gateway failed");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting cns");

    let listener = bootstrap::bind_listener(&config.listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    if config.enable_tfo {
        if let Err(e) =
            cns_networking::enable_fast_open(&listener, cns_networking::DEFAULT_FAST_OPEN_QUEUE)
        {
            warn!(error = %e, "Failed to enable TCP Fast Open");
        }
    }

    if let Some(pid_path) = config.pid_path() {
        if let Err(e) = bootstrap::write_pid_file(pid_path) {
            warn!(error = %e, "Failed to write pid file");
        }
    }

    let tunnel_settings = Arc::new(config.tunnel_settings());
    let dispatch_settings = config.dispatch_settings();

    bootstrap::prepare_process();

    info!(
        listen_addr = %config.listen_addr,
        udp_flag = %config.udp_flag,
        httpdns = config.enable_httpdns,
        tcp_fast_open = config.enable_tfo,
        cipher = tunnel_settings.cipher.is_some(),
        udp_timeout_secs = config.udp_timeout_secs,
        tcp_keepalive_secs = config.tcp_keepalive_secs,
        max_rereads = config.max_rereads,
        "Configuration loaded"
    );

    let relays = Relays {
        tcp: Arc::new(HeaderTcpTunnel::new(Arc::clone(&tunnel_settings))),
        udp: Arc::new(FramedUdpTunnel::new(Arc::clone(&tunnel_settings))),
        httpdns: Arc::new(HttpDnsServer::new()),
    };
    let dispatcher = Arc::new(Dispatcher::new(dispatch_settings, relays));
    let acceptor = TcpAcceptor::new(listener, config.tcp_keepalive());

    Gateway::new(GatewayConfig::default(), acceptor, dispatcher)
        .run()
        .await;

    Ok(())
}
