//! Tunnel accept loop and per-circuit handling

use super::{parse_connect_port, read_request_head, TunnelError, REQUEST_TIMEOUT};
use crate::budget::{BudgetPermit, ConnectionBudget};
use crate::relay::relay;
use crate::transport::DecoyTlsConnector;
use crate::{Endpoint, Error, CONNECT_ESTABLISHED};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by every circuit of one listener
struct CircuitContext {
    connector: DecoyTlsConnector,
    /// Physical destination host and fallback port
    upstream: Endpoint,
}

/// Disguise tunnel listener
pub struct TunnelListener {
    listener: TcpListener,
    context: Arc<CircuitContext>,
    budget: ConnectionBudget,
}

impl TunnelListener {
    /// Bind the local endpoint. A bind failure is fatal to the process.
    pub async fn bind(
        addr: SocketAddr,
        connector: DecoyTlsConnector,
        upstream: Endpoint,
        budget: ConnectionBudget,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            listener,
            context: Arc::new(CircuitContext {
                connector,
                upstream,
            }),
            budget,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept callers until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let local = self.local_addr().ok();
        info!(
            listen = ?local,
            upstream = %self.context.upstream.host,
            sni = %self.context.connector.decoy(),
            "Disguise tunnel listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Tunnel accept failed");
                        continue;
                    }
                },
            };

            // Over budget: drop the socket before reading a single byte
            let Some(permit) = self.budget.try_acquire() else {
                warn!(%peer, ceiling = self.budget.ceiling(), "Connection budget exhausted, rejecting");
                drop(stream);
                continue;
            };

            debug!(%peer, "Tunnel connection accepted");
            let context = Arc::clone(&self.context);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_circuit(stream, peer, &context, &shutdown, permit).await {
                    warn!(%peer, error = %e, "Tunnel circuit failed");
                }
            });
        }

        info!("Disguise tunnel stopped");
    }
}

async fn handle_circuit(
    mut local: TcpStream,
    peer: SocketAddr,
    context: &CircuitContext,
    shutdown: &CancellationToken,
    _permit: BudgetPermit,
) -> Result<(), TunnelError> {
    let request = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        read = tokio::time::timeout(REQUEST_TIMEOUT, read_request_head(&mut local)) => {
            read.map_err(|_| TunnelError::RequestTimeout)??
        }
    };

    if request.is_empty() {
        debug!(%peer, "Caller closed before sending a request");
        return Ok(());
    }

    let port = parse_connect_port(&request.head, context.upstream.port);
    debug!(%peer, port, "Opening disguised upstream");

    let mut upstream = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        connected = context.connector.connect(&context.upstream.host, port) => {
            connected.map_err(|source| TunnelError::Connect { port, source })?
        }
    };

    local.write_all(CONNECT_ESTABLISHED).await?;

    if !request.remainder.is_empty() {
        upstream.write_all(&request.remainder).await?;
    }

    let stats = relay(local, upstream, shutdown).await;
    debug!(%peer, port, sent = stats.a_to_b, received = stats.b_to_a, "Tunnel circuit closed");

    Ok(())
}
