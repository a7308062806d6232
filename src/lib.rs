//! # Decoy Tunnel
//!
//! Carries an SSH session inside a TLS connection whose Server Name Indication
//! names an innocuous decoy host, then exposes a local SOCKS5 proxy whose
//! streams ride the SSH session as `direct-tcpip` channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  SOCKS5 Server                       │
//! │      (one instance per live SSH session)             │
//! ├─────────────────────────────────────────────────────┤
//! │              SSH Session Supervisor                  │
//! │   (HTTP CONNECT dial, auth, health, reconnection)    │
//! ├─────────────────────────────────────────────────────┤
//! │             Disguise Tunnel Listener                 │
//! │     (TCP to the SSH host, TLS with decoy SNI)        │
//! ├─────────────────────────────────────────────────────┤
//! │        Relay Primitive  ·  Connection Budget         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every long-running loop observes a single [`CancellationToken`] used as
//! the process-wide shutdown signal.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod app;
pub mod budget;
pub mod config;
pub mod logging;
pub mod obfuscation;
pub mod proxy;
pub mod relay;
pub mod ssh;
pub mod transport;
pub mod tunnel;

pub use app::App;
pub use budget::{BudgetPermit, ConnectionBudget};
pub use config::Config;

use std::net::SocketAddr;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Literal reply sent to a disguise-tunnel caller once the TLS leg is up
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),
}

/// A host and port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
