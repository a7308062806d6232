//! Bidirectional byte relay
//!
//! Pumps bytes between two duplex streams until either direction ends.
//! Each direction reads into its own buffer and fully drains it into the
//! other side before reading again, so memory per relay is bounded by two
//! buffers regardless of how fast either peer is.
//!
//! Teardown is fail-fast: the first direction to hit EOF or an I/O error
//! ends the whole relay and both write sides are shut down. Half-closed
//! connections are not preserved.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Per-direction buffer size (32 KB)
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound for flushing and closing a write side during teardown
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// How a single direction stopped
#[derive(Debug)]
pub enum DirectionEnd {
    /// Source returned a zero-length read
    Eof,
    /// Read or write failed (reset, broken pipe, ...)
    Error(io::Error),
    /// Shutdown signal observed
    Shutdown,
}

/// Relay `a` and `b` until one side finishes or `shutdown` fires.
///
/// I/O errors are absorbed; the caller only learns how many bytes moved.
pub async fn relay<A, B>(a: A, b: B, shutdown: &CancellationToken) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut stats = RelayStats::default();

    {
        let a_to_b = forward(&mut a_read, &mut b_write, &mut stats.a_to_b, shutdown);
        let b_to_a = forward(&mut b_read, &mut a_write, &mut stats.b_to_a, shutdown);

        tokio::select! {
            end = a_to_b => trace!(?end, "a->b direction finished"),
            end = b_to_a => trace!(?end, "b->a direction finished"),
        }
    }

    // Closing both write sides is what tells each peer the relay is over
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, a_write.shutdown()).await;
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, b_write.shutdown()).await;

    stats
}

/// Copy from `src` to `dst` until EOF, error or shutdown
pub async fn forward<R, W>(
    src: &mut R,
    dst: &mut W,
    counter: &mut u64,
    shutdown: &CancellationToken,
) -> DirectionEnd
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return DirectionEnd::Shutdown,
            read = src.read(&mut buf) => match read {
                Ok(0) => return DirectionEnd::Eof,
                Ok(n) => n,
                Err(e) => return DirectionEnd::Error(e),
            },
        };

        let drain = async {
            dst.write_all(&buf[..n]).await?;
            dst.flush().await
        };

        tokio::select! {
            _ = shutdown.cancelled() => return DirectionEnd::Shutdown,
            written = drain => {
                if let Err(e) = written {
                    return DirectionEnd::Error(e);
                }
            }
        }

        *counter += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::time::timeout;

    const BOUND: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (mut client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);
        let shutdown = CancellationToken::new();

        let relay_task = tokio::spawn(async move { relay(a, b, &shutdown).await });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);
        let stats = timeout(BOUND, relay_task).await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { a_to_b: 4, b_to_a: 5 });
    }

    #[tokio::test]
    async fn test_closing_a_closes_b() {
        let (client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);
        let shutdown = CancellationToken::new();

        let relay_task = tokio::spawn(async move { relay(a, b, &shutdown).await });
        drop(client);

        let mut buf = [0u8; 16];
        let n = timeout(BOUND, server.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);

        timeout(BOUND, relay_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closing_b_closes_a() {
        let (mut client, a) = duplex(1024);
        let (b, server) = duplex(1024);
        let shutdown = CancellationToken::new();

        let relay_task = tokio::spawn(async move { relay(a, b, &shutdown).await });
        drop(server);

        let mut buf = [0u8; 16];
        let n = timeout(BOUND, client.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);

        timeout(BOUND, relay_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_relay() {
        let (_client, a) = duplex(1024);
        let (b, _server) = duplex(1024);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let relay_task = tokio::spawn(async move { relay(a, b, &token).await });
        shutdown.cancel();

        let stats = timeout(BOUND, relay_task).await.unwrap().unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test]
    async fn test_large_transfer_with_small_pipe() {
        let (mut client, a) = duplex(512);
        let (b, mut server) = duplex(512);
        let shutdown = CancellationToken::new();

        let relay_task = tokio::spawn(async move { relay(a, b, &shutdown).await });

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client
        });

        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        let stats = timeout(BOUND, relay_task).await.unwrap().unwrap();
        assert_eq!(stats.a_to_b, 200_000);
    }
}
