//! Dials SSH sessions through the disguise tunnel

use super::session::{authenticate, ClientHandler, RusshSession};
use super::{SessionFactory, SharedSession, SshError};
use crate::config::SshConfig;
use crate::transport::http_connect;
use crate::Endpoint;
use async_trait::async_trait;
use russh::client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Server keepalive cadence; russh drops the session after three misses
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// [`SessionFactory`] that reaches the SSH server via the local tunnel
pub struct SshDialer {
    tunnel_addr: SocketAddr,
    target: Endpoint,
    ssh: Arc<SshConfig>,
    russh_config: Arc<client::Config>,
    timeout: Duration,
}

impl SshDialer {
    pub fn new(tunnel_addr: SocketAddr, ssh: Arc<SshConfig>, timeout: Duration) -> Self {
        if ssh.host_key_fingerprint.is_none() {
            warn!(
                host = %ssh.host,
                "SSH host key verification disabled; set ssh.host_key_fingerprint to pin it"
            );
        }

        let russh_config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            tunnel_addr,
            target: Endpoint::new(ssh.host.clone(), ssh.port),
            ssh,
            russh_config: Arc::new(russh_config),
            timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for SshDialer {
    async fn establish(&self) -> Result<SharedSession, SshError> {
        let stream = http_connect(self.tunnel_addr, &self.target, self.timeout).await?;
        debug!(tunnel = %self.tunnel_addr, target = %self.target, "Tunnel dialed, starting SSH handshake");

        let handler = ClientHandler::new(
            self.ssh.host.clone(),
            self.ssh.host_key_fingerprint.clone(),
        );

        let mut handle = tokio::time::timeout(
            self.timeout,
            client::connect_stream(Arc::clone(&self.russh_config), stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout)??;

        let authenticated = tokio::time::timeout(self.timeout, authenticate(&mut handle, &self.ssh))
            .await
            .map_err(|_| SshError::Timeout)
            .and_then(|auth| auth);

        if let Err(e) = authenticated {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(e);
        }

        Ok(Arc::new(RusshSession::new(handle)))
    }
}
