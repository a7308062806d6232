//! SSH session layer
//!
//! The supervisor owns at most one live session at a time. Everything else
//! sees a session only through the [`Session`] trait, which is what the
//! SOCKS5 server opens `direct-tcpip` channels on.

mod dialer;
mod session;
mod supervisor;

pub use dialer::SshDialer;
pub use session::{fingerprints_match, ClientHandler, RusshSession};
pub use supervisor::{Supervisor, SupervisorState, SupervisorTimings};

use crate::transport::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// SSH errors
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Proxy dial failed: {0}")]
    Dial(#[from] TransportError),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("Failed to load private key: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("Authentication failed for user {0}")]
    AuthFailed(String),

    #[error("No usable credentials (key file missing and no password)")]
    NoCredentials,

    #[error("Channel open to {target} failed: {reason}")]
    ChannelOpen { target: String, reason: String },

    #[error("Session closed")]
    Closed,

    #[error("SSH handshake timed out")]
    Timeout,
}

/// Byte stream of one SSH channel
pub trait ChannelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type ChannelStream = Box<dyn ChannelIo>;

/// An authenticated SSH session
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Open a `direct-tcpip` channel to `host:port` on behalf of `originator`
    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<ChannelStream, SshError>;

    /// Whether the underlying transport is gone
    fn is_closed(&self) -> bool;

    /// Disconnect; idempotent
    async fn close(&self);
}

pub type SharedSession = Arc<dyn Session>;

/// Produces fresh authenticated sessions for the supervisor
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn establish(&self) -> Result<SharedSession, SshError>;
}
