//! SOCKS5 proxy implementation (RFC 1928 subset)
//!
//! No authentication, CONNECT only. IPv4, domain and IPv6 targets.

use super::{Address, ProxyError};
use crate::budget::{BudgetPermit, ConnectionBudget};
use crate::relay::relay;
use crate::ssh::SharedSession;
use crate::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SOCKS5 version
const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required"
const METHOD_NO_AUTH: u8 = 0x00;

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    Connect = 0x01,
}

impl TryFrom<u8> for Command {
    type Error = ProxyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Connect),
            _ => Err(ProxyError::UnsupportedCommand(value)),
        }
    }
}

/// Address types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AddressType {
    Ipv4 = 0x01,
    Domain = 0x03,
    Ipv6 = 0x04,
}

impl TryFrom<u8> for AddressType {
    type Error = ProxyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(AddressType::Ipv4),
            0x03 => Ok(AddressType::Domain),
            0x04 => Ok(AddressType::Ipv6),
            _ => Err(ProxyError::UnsupportedAddressType(value)),
        }
    }
}

/// Reply codes
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Reply {
    Succeeded = 0x00,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Replies always carry an all-zero IPv4 bound address
fn make_reply(reply: Reply) -> [u8; 10] {
    [
        SOCKS_VERSION,
        reply as u8,
        0x00,
        AddressType::Ipv4 as u8,
        0,
        0,
        0,
        0,
        0,
        0,
    ]
}

/// Run the server side of the SOCKS5 handshake.
///
/// Sends every reply, including the success reply, and returns the
/// requested target. On an unsupported command or address type the error
/// reply has already been written when this returns `Err`.
pub async fn negotiate<S>(stream: &mut S) -> Result<Address, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting
    let mut buf = [0u8; 255];
    stream.read_exact(&mut buf[..2]).await?;

    if buf[0] != SOCKS_VERSION {
        return Err(ProxyError::InvalidSocksVersion(buf[0]));
    }

    // Offered methods are irrelevant; no-auth is the only one we speak
    let nmethods = buf[1] as usize;
    stream.read_exact(&mut buf[..nmethods]).await?;
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

    // Request; its version byte is not checked again
    stream.read_exact(&mut buf[..4]).await?;

    if let Err(e) = Command::try_from(buf[1]) {
        stream.write_all(&make_reply(Reply::CommandNotSupported)).await?;
        return Err(e);
    }

    // buf[2] is reserved
    let addr_type = match AddressType::try_from(buf[3]) {
        Ok(addr_type) => addr_type,
        Err(e) => {
            stream
                .write_all(&make_reply(Reply::AddressTypeNotSupported))
                .await?;
            return Err(e);
        }
    };

    let address = match addr_type {
        AddressType::Ipv4 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            Address::Ipv4(ip, read_port(stream).await?)
        }
        AddressType::Domain => {
            stream.read_exact(&mut buf[..1]).await?;
            let len = buf[0] as usize;
            stream.read_exact(&mut buf[..len]).await?;
            let domain = String::from_utf8_lossy(&buf[..len]).into_owned();
            Address::Domain(domain, read_port(stream).await?)
        }
        AddressType::Ipv6 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            Address::Ipv6(ip, read_port(stream).await?)
        }
    };

    stream.write_all(&make_reply(Reply::Succeeded)).await?;
    stream.flush().await?;

    Ok(address)
}

async fn read_port<S>(stream: &mut S) -> Result<u16, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// SOCKS5 server bound to one SSH session
pub struct Socks5Server {
    listener: TcpListener,
    session: SharedSession,
    budget: ConnectionBudget,
    handshake_timeout: Duration,
}

impl Socks5Server {
    /// Bind the SOCKS5 port. A bind failure is fatal to the process.
    pub async fn bind(
        addr: SocketAddr,
        session: SharedSession,
        budget: ConnectionBudget,
        handshake_timeout: Duration,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            listener,
            session,
            budget,
            handshake_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until `shutdown` fires; the listener closes on return
    pub async fn run(self, shutdown: CancellationToken) {
        info!(listen = ?self.local_addr().ok(), "SOCKS5 server listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "SOCKS5 accept failed");
                        continue;
                    }
                },
            };

            let Some(permit) = self.budget.try_acquire() else {
                warn!(%peer, ceiling = self.budget.ceiling(), "Connection budget exhausted, rejecting");
                drop(stream);
                continue;
            };

            debug!(%peer, "New SOCKS5 connection");
            let session = SharedSession::clone(&self.session);
            let handshake_timeout = self.handshake_timeout;
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    handle_client(stream, peer, session, handshake_timeout, &shutdown, permit).await
                {
                    debug!(%peer, error = %e, "SOCKS5 connection error");
                }
            });
        }

        info!("SOCKS5 server stopped");
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    session: SharedSession,
    handshake_timeout: Duration,
    shutdown: &CancellationToken,
    _permit: BudgetPermit,
) -> Result<(), ProxyError> {
    let target = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        negotiated = tokio::time::timeout(handshake_timeout, negotiate(&mut stream)) => {
            negotiated.map_err(|_| ProxyError::HandshakeTimeout)??
        }
    };

    debug!(%peer, %target, "SOCKS5 CONNECT");

    let channel = match session
        .open_direct_tcpip(&target.host(), target.port(), peer)
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!(%peer, %target, error = %e, "SSH channel open failed");
            return Err(e.into());
        }
    };

    let stats = relay(stream, channel, shutdown).await;
    debug!(%peer, %target, sent = stats.a_to_b, received = stats.b_to_a, "SOCKS5 connection closed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn run_negotiation(client_bytes: &[u8]) -> (Result<Address, ProxyError>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(client_bytes).await.unwrap();
        client.shutdown().await.unwrap();

        let result = negotiate(&mut server).await;
        drop(server);

        let mut replies = Vec::new();
        client.read_to_end(&mut replies).await.unwrap();
        (result, replies)
    }

    #[tokio::test]
    async fn test_connect_ipv4() {
        let (result, replies) =
            run_negotiation(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
                .await;

        assert_eq!(result.unwrap(), Address::Ipv4([127, 0, 0, 1], 80));
        assert_eq!(
            replies,
            [0x05, 0x00, 0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_connect_domain() {
        let mut request = vec![0x05, 0x02, 0x00, 0x02, 0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&443u16.to_be_bytes());

        let (result, _) = run_negotiation(&request).await;
        assert_eq!(
            result.unwrap(),
            Address::Domain("example.com".to_string(), 443)
        );
    }

    #[tokio::test]
    async fn test_connect_ipv6() {
        let mut request = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x04];
        let mut ip = [0u8; 16];
        ip[0] = 0x20;
        ip[1] = 0x01;
        ip[15] = 0x01;
        request.extend_from_slice(&ip);
        request.extend_from_slice(&8443u16.to_be_bytes());

        let (result, _) = run_negotiation(&request).await;
        let address = result.unwrap();
        assert_eq!(address, Address::Ipv6(ip, 8443));
        assert_eq!(address.host(), "2001::1");
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        // BIND
        let (result, replies) =
            run_negotiation(&[0x05, 0x01, 0x00, 0x05, 0x02, 0x00, 0x01, 1, 2, 3, 4, 0, 80]).await;

        assert!(matches!(result, Err(ProxyError::UnsupportedCommand(0x02))));
        assert_eq!(
            replies,
            [0x05, 0x00, 0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_unsupported_address_type() {
        let (result, replies) = run_negotiation(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x09]).await;

        assert!(matches!(result, Err(ProxyError::UnsupportedAddressType(0x09))));
        assert_eq!(
            replies,
            [0x05, 0x00, 0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_wrong_version_gets_no_reply() {
        let (result, replies) = run_negotiation(&[0x04, 0x01, 0x00]).await;

        assert!(matches!(result, Err(ProxyError::InvalidSocksVersion(0x04))));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_request_version_byte_is_ignored() {
        let (result, replies) = run_negotiation(&[
            0x05, 0x01, 0x00, 0x04, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0x00, 0x50,
        ])
        .await;

        let target = result.unwrap();
        assert_eq!(target.host(), "10.0.0.1");
        assert_eq!(target.port(), 80);
        assert_eq!(replies[..4], [0x05, 0x00, 0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_truncated_request() {
        let (result, _) = run_negotiation(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127]).await;
        assert!(matches!(result, Err(ProxyError::Io(_))));
    }
}
