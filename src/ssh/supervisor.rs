//! SSH session supervisor
//!
//! ```text
//!   Disconnected ──▶ Connecting ──▶ Connected ──▶ Reconnecting ─┐
//!        ▲               │  ▲                                   │
//!        └── (failure) ──┘  └───────────────────────────────────┘
//!
//!   any state ──(shutdown)──▶ Stopped
//! ```
//!
//! While connected, one SOCKS5 server is bound to the session. It is torn
//! down (and its port released) before the supervisor leaves `Connected`.

use super::{SessionFactory, SharedSession};
use crate::budget::ConnectionBudget;
use crate::config::SupervisorConfig;
use crate::proxy::Socks5Server;
use crate::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Longest wait for an SSH disconnect to be sent
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Disconnected => "disconnected",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Connected => "connected",
            SupervisorState::Reconnecting => "reconnecting",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Intervals driving the supervisor
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    pub health_interval: Duration,
    pub reconnect_backoff: Duration,
    pub retry_backoff: Duration,
    pub socks_handshake_timeout: Duration,
}

impl From<&SupervisorConfig> for SupervisorTimings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            health_interval: config.health_interval(),
            reconnect_backoff: config.reconnect_backoff(),
            retry_backoff: config.retry_backoff(),
            socks_handshake_timeout: config.socks_handshake_timeout(),
        }
    }
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

/// Why a connected session ended
enum SessionEnd {
    Shutdown,
    Broken,
}

/// Keeps one SSH session alive and a SOCKS5 server bound to it
pub struct Supervisor<F> {
    factory: F,
    socks_addr: SocketAddr,
    budget: ConnectionBudget,
    timings: SupervisorTimings,
    state_tx: watch::Sender<SupervisorState>,
    session_tx: watch::Sender<Option<SharedSession>>,
}

impl<F: SessionFactory> Supervisor<F> {
    pub fn new(
        factory: F,
        socks_addr: SocketAddr,
        budget: ConnectionBudget,
        timings: SupervisorTimings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        let (session_tx, _) = watch::channel(None);

        Self {
            factory,
            socks_addr,
            budget,
            timings,
            state_tx,
            session_tx,
        }
    }

    /// Observe state transitions
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Observe the currently published session
    pub fn session(&self) -> watch::Receiver<Option<SharedSession>> {
        self.session_tx.subscribe()
    }

    /// Supervise until `shutdown` fires.
    ///
    /// Connect and auth failures are retried forever. Only failing to bind
    /// the SOCKS5 port returns an error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let result = self.supervise(&shutdown).await;
        self.set_state(SupervisorState::Stopped);
        result
    }

    async fn supervise(&self, shutdown: &CancellationToken) -> Result<(), Error> {
        while !shutdown.is_cancelled() {
            self.set_state(SupervisorState::Connecting);

            let established = tokio::select! {
                _ = shutdown.cancelled() => break,
                established = self.factory.establish() => established,
            };

            let session = match established {
                Ok(session) => session,
                Err(e) => {
                    error!(error = %e, retry_in = ?self.timings.retry_backoff, "SSH connection failed");
                    self.set_state(SupervisorState::Disconnected);
                    if !sleep_or_shutdown(self.timings.retry_backoff, shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let server = match Socks5Server::bind(
                self.socks_addr,
                Arc::clone(&session),
                self.budget.clone(),
                self.timings.socks_handshake_timeout,
            )
            .await
            {
                Ok(server) => server,
                Err(e) => {
                    close_session(&session).await;
                    return Err(e);
                }
            };

            let socks_shutdown = shutdown.child_token();
            let socks_task = tokio::spawn(server.run(socks_shutdown.clone()));

            self.session_tx.send_replace(Some(Arc::clone(&session)));
            self.set_state(SupervisorState::Connected);

            let end = self.watch_session(&session, socks_task, &socks_shutdown, shutdown).await;

            self.session_tx.send_replace(None);
            close_session(&session).await;

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Broken => {
                    self.set_state(SupervisorState::Reconnecting);
                    if !sleep_or_shutdown(self.timings.reconnect_backoff, shutdown).await {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Poll health until the session breaks or shutdown fires, then stop
    /// the SOCKS5 server and wait for its listener to close.
    async fn watch_session(
        &self,
        session: &SharedSession,
        mut socks_task: JoinHandle<()>,
        socks_shutdown: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let mut socks_finished = false;

        let end = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = &mut socks_task => {
                    warn!("SOCKS5 server exited unexpectedly");
                    socks_finished = true;
                    break SessionEnd::Broken;
                }
                _ = tokio::time::sleep(self.timings.health_interval) => {
                    if session.is_closed() {
                        warn!("SSH transport lost");
                        break SessionEnd::Broken;
                    }
                }
            }
        };

        socks_shutdown.cancel();
        if !socks_finished {
            let _ = socks_task.await;
        }

        end
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "SSH supervisor state changed");
        }
    }
}

/// A wedged transport can stall the disconnect; give up after a bound
async fn close_session(session: &SharedSession) {
    if tokio::time::timeout(SESSION_CLOSE_TIMEOUT, session.close())
        .await
        .is_err()
    {
        warn!(timeout = ?SESSION_CLOSE_TIMEOUT, "SSH disconnect timed out, dropping session");
    }
}

/// Sleep for `duration`; `false` if shutdown fired first
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
