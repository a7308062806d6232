//! Disguise tunnel
//!
//! A local CONNECT-style listener. Each accepted caller gets a TLS
//! connection to the configured SSH host whose ClientHello names the decoy
//! host, and from then on bytes are relayed verbatim in both directions.
//!
//! Only the port of the caller's request target is honored; the host is
//! always the configured SSH host.

mod listener;
mod request;

pub use listener::TunnelListener;
pub use request::{parse_connect_port, read_request_head, RequestHead};

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Cap on the caller's initial request (16 KB)
pub const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// How long a caller has to send its request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunnel circuit errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for request")]
    RequestTimeout,

    #[error("Upstream connect to port {port} failed: {source}")]
    Connect {
        port: u16,
        #[source]
        source: TransportError,
    },
}
