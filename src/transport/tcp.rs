//! Raw TCP dialing

use super::TransportError;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connect to `host:port` within `timeout`, with Nagle disabled
pub async fn connect_tcp(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|source| TransportError::ConnectionFailed {
            addr: format!("{}:{}", host, port),
            source,
        })?;

    // Small writes (SSH packets, handshake records) shouldn't wait on Nagle
    stream.set_nodelay(true).ok();

    Ok(stream)
}
