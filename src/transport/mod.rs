//! Transport layer
//!
//! Outbound connection primitives used by the tunnel and the SSH dialer:
//! - TCP connect with timeout
//! - TLS with a decoy SNI and unchecked certificates
//! - HTTP CONNECT client (how the SSH dialer reaches the disguise tunnel)

mod http_connect;
mod tcp;
mod tls;

pub use http_connect::http_connect;
pub use tcp::connect_tcp;
pub use tls::{DecoyTlsConnector, DecoyTlsStream};

use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid SNI: {0}")]
    InvalidSni(String),

    #[error("Proxy rejected CONNECT: {0}")]
    ProxyRejected(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}
