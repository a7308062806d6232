//! Local SOCKS5 proxy
//!
//! Each CONNECT request becomes one `direct-tcpip` channel on the current
//! SSH session.

mod socks5;

pub use socks5::{negotiate, Socks5Server};

use crate::ssh::SshError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SOCKS version: {0}")]
    InvalidSocksVersion(u8),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Channel open failed: {0}")]
    Channel(#[from] SshError),
}

/// Proxy target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address and port
    Ipv4([u8; 4], u16),
    /// IPv6 address and port
    Ipv6([u8; 16], u16),
    /// Domain name and port
    Domain(String, u16),
}

impl Address {
    /// Host part, as passed to the SSH server
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4(ip, _) => Ipv4Addr::from(*ip).to_string(),
            Address::Ipv6(ip, _) => Ipv6Addr::from(*ip).to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Ipv6(_, port) | Address::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv6(..) => write!(f, "[{}]:{}", self.host(), self.port()),
            _ => write!(f, "{}:{}", self.host(), self.port()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(Address::Ipv4([127, 0, 0, 1], 80).to_string(), "127.0.0.1:80");
        assert_eq!(
            Address::Domain("example.com".to_string(), 443).to_string(),
            "example.com:443"
        );

        let mut v6 = [0u8; 16];
        v6[15] = 1;
        let addr = Address::Ipv6(v6, 22);
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:22");
    }
}
