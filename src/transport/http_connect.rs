//! HTTP CONNECT client
//!
//! The SSH dialer reaches the disguise tunnel the same way any other caller
//! does: by sending a CONNECT request and waiting for a 200.

use super::{connect_tcp, TransportError};
use crate::Endpoint;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Upper bound on a CONNECT response head
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a CONNECT tunnel to `target` through the proxy at `proxy`.
///
/// The returned stream is positioned right after the response head; no
/// bytes of the tunneled protocol are consumed.
pub async fn http_connect(
    proxy: SocketAddr,
    target: &Endpoint,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let mut stream = connect_tcp(&proxy.ip().to_string(), proxy.port(), timeout).await?;

    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n",
        target = target
    );

    tokio::time::timeout(timeout, async {
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let head = read_response_head(&mut stream).await?;
        check_status(&head)
    })
    .await
    .map_err(|_| TransportError::Timeout)??;

    debug!(proxy = %proxy, target = %target, "CONNECT tunnel established");
    Ok(stream)
}

/// Read up to and including the blank line, one byte at a time
async fn read_response_head<R>(stream: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(TransportError::ProxyRejected(
                "response head too large".to_string(),
            ));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(TransportError::Closed);
        }
        head.push(byte[0]);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn check_status(head: &str) -> Result<(), TransportError> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some("HTTP/1.1" | "HTTP/1.0"), Some("200")) => Ok(()),
        _ => Err(TransportError::ProxyRejected(status_line.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn proxy_replying(reply: &'static [u8]) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_response_head(&mut socket).await.unwrap();
            socket.write_all(reply).await.unwrap();
            socket.flush().await.unwrap();
            // Hold the socket until the client has read everything
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest).await;
            request
        });

        (addr, handle)
    }

    #[test]
    fn test_status_parsing() {
        assert!(check_status("HTTP/1.1 200 Connection Established\r\n\r\n").is_ok());
        assert!(check_status("HTTP/1.0 200 OK\r\n\r\n").is_ok());
        assert!(check_status("HTTP/1.1 403 Forbidden\r\n\r\n").is_err());
        assert!(check_status("garbage\r\n\r\n").is_err());
        assert!(check_status("").is_err());
    }

    #[tokio::test]
    async fn test_connect_does_not_over_read() {
        let (addr, proxy) =
            proxy_replying(b"HTTP/1.1 200 Connection Established\r\n\r\nSSH-2.0-test\r\n").await;

        let target = Endpoint::new("ssh.internal", 2222);
        let mut stream = http_connect(addr, &target, Duration::from_secs(5))
            .await
            .unwrap();

        let mut banner = [0u8; 14];
        stream.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"SSH-2.0-test\r\n");
        drop(stream);

        let request = proxy.await.unwrap();
        assert!(request.starts_with("CONNECT ssh.internal:2222 HTTP/1.1\r\n"));
        assert!(request.contains("Host: ssh.internal:2222\r\n"));
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let (addr, _proxy) = proxy_replying(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;

        let err = http_connect(addr, &Endpoint::new("host", 22), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ProxyRejected(_)));
    }

    #[tokio::test]
    async fn test_connect_closed_before_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let err = http_connect(addr, &Endpoint::new("host", 22), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Closed | TransportError::Io(_)
        ));
    }
}
