//! Test harness for gateway integration tests.
//!
//! Provides helpers to spawn TCP and UDP echo upstreams and a gateway bound
//! to an ephemeral loopback port with the real relays behind it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;

use cns_gateway::{
    DispatchSettings, Dispatcher, FramedUdpTunnel, Gateway, GatewayConfig, GatewayStats,
    HeaderTcpTunnel, HttpDnsServer, Relays, TcpAcceptor, TunnelSettings,
};

#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        let Ok((mut stream, _)) = accept_result else { break };
                        conn_clone.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(async move {
                            let mut buf = vec![0u8; 8192];
                            loop {
                                match stream.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(n) => {
                                        if stream.write_all(&buf[..n]).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    #[allow(dead_code)]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[allow(dead_code)]
pub struct UdpEchoBackend {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl UdpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        let Ok((n, from)) = result else { break };
                        let _ = socket.send_to(&buf[..n], from).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Drop for UdpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct GatewayHandle {
    pub listen_addr: SocketAddr,
    pub stats: Arc<GatewayStats>,
}

#[allow(dead_code)]
impl GatewayHandle {
    /// Spawn a gateway with a plaintext tunnel (no cipher).
    pub async fn spawn() -> io::Result<Self> {
        Self::spawn_with(TunnelSettings::new("Meng", ""), DispatchSettings::new("httpUDP")).await
    }

    pub async fn spawn_with(
        tunnel_settings: TunnelSettings,
        dispatch_settings: DispatchSettings,
    ) -> io::Result<Self> {
        let tunnel_settings = Arc::new(tunnel_settings);
        let relays = Relays {
            tcp: Arc::new(HeaderTcpTunnel::new(Arc::clone(&tunnel_settings))),
            udp: Arc::new(FramedUdpTunnel::new(Arc::clone(&tunnel_settings))),
            httpdns: Arc::new(HttpDnsServer::new()),
        };
        let dispatcher = Arc::new(Dispatcher::new(dispatch_settings, relays));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let acceptor = TcpAcceptor::new(listener, Duration::from_secs(60));
        let gateway = Gateway::new(GatewayConfig::default(), acceptor, dispatcher);

        let listen_addr = gateway.acceptor().local_addr()?;
        let stats = Arc::clone(gateway.stats());

        tokio::spawn(async move {
            gateway.run().await;
        });

        Ok(Self { listen_addr, stats })
    }

    pub fn sessions_finished(&self) -> u64 {
        self.stats.sessions_finished()
    }

    /// Wait until `count` sessions have finished, or the deadline passes.
    pub async fn wait_for_sessions(&self, count: u64, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.sessions_finished() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
