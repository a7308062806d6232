//! Process orchestration
//!
//! Builds the budget(s), binds the disguise tunnel, then hands control to
//! the SSH supervisor until the shutdown signal fires.

use crate::budget::ConnectionBudget;
use crate::config::Config;
use crate::obfuscation::FingerprintConfig;
use crate::ssh::{SshDialer, Supervisor, SupervisorTimings};
use crate::transport::DecoyTlsConnector;
use crate::tunnel::TunnelListener;
use crate::{Endpoint, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The running system: disguise tunnel, SSH supervisor and SOCKS5 server
pub struct App {
    config: Arc<Config>,
}

impl App {
    /// `config` must already be validated
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run until `shutdown` fires.
    ///
    /// Returns an error only when a listener cannot be bound or the TLS
    /// client cannot be configured. The shutdown signal is raised on the
    /// way out either way, so every task winds down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let result = self.serve(&shutdown).await;
        shutdown.cancel();
        result
    }

    async fn serve(&self, shutdown: &CancellationToken) -> Result<()> {
        let settings = &self.config.settings;
        let ssh = Arc::new(self.config.ssh.clone());

        let tunnel_budget = ConnectionBudget::new(settings.max_connections);
        let socks_budget = if settings.shared_budget {
            tunnel_budget.clone()
        } else {
            ConnectionBudget::new(settings.max_connections)
        };

        let fingerprint =
            FingerprintConfig::new(self.config.sni.profile).with_alpn(self.config.sni.alpn.clone());
        let connector = DecoyTlsConnector::new(
            self.config.sni.server_name.clone(),
            &fingerprint,
            settings.connect_timeout(),
        )?;

        let tunnel = TunnelListener::bind(
            settings.tunnel_addr(),
            connector,
            Endpoint::new(ssh.host.clone(), ssh.port),
            tunnel_budget,
        )
        .await?;
        let tunnel_addr = dialable(tunnel.local_addr()?);

        info!(
            version = crate::VERSION,
            tunnel = %tunnel_addr,
            socks = %settings.socks_addr(),
            max_connections = settings.max_connections,
            shared_budget = settings.shared_budget,
            "Starting decoy tunnel"
        );

        let tunnel_task = tokio::spawn(tunnel.run(shutdown.clone()));

        let dialer = SshDialer::new(tunnel_addr, ssh, settings.connect_timeout());
        let supervisor = Supervisor::new(
            dialer,
            settings.socks_addr(),
            socks_budget,
            SupervisorTimings::from(&self.config.supervisor),
        );

        let result = supervisor.run(shutdown.clone()).await;

        shutdown.cancel();
        let _ = tunnel_task.await;

        info!("Decoy tunnel stopped");
        result
    }
}

/// A wildcard bind address can't be dialed; use loopback of the same family
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
