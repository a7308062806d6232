//! Reading and interpreting the caller's request

use super::MAX_REQUEST_SIZE;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// What the caller sent before the relay starts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request text up to and including the blank line (or everything read)
    pub head: String,
    /// Bytes that arrived after the blank line; forwarded upstream
    pub remainder: Vec<u8>,
}

impl RequestHead {
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.remainder.is_empty()
    }
}

/// Read until the end of the request head, `MAX_REQUEST_SIZE` bytes, or EOF
pub async fn read_request_head<R>(stream: &mut R) -> io::Result<RequestHead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    while buf.len() < MAX_REQUEST_SIZE {
        let want = chunk.len().min(MAX_REQUEST_SIZE - buf.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }

        // Only the newly read bytes (plus 3 of overlap) can complete the terminator
        let search_from = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_terminator(&buf[search_from..]) {
            let end = search_from + pos + HEAD_TERMINATOR.len();
            let remainder = buf.split_off(end);
            return Ok(RequestHead {
                head: String::from_utf8_lossy(&buf).into_owned(),
                remainder,
            });
        }
    }

    Ok(RequestHead {
        head: String::from_utf8_lossy(&buf).into_owned(),
        remainder: Vec::new(),
    })
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// Extract the destination port from a request such as
/// `CONNECT host:443 HTTP/1.1`.
///
/// The port is whatever follows the last `:` of the request target. Anything
/// unparsable (or port 0) yields `default`.
pub fn parse_connect_port(request: &str, default: u16) -> u16 {
    let first_line = request.lines().next().unwrap_or_default();
    let mut tokens = first_line.split_whitespace();

    let target = match (tokens.next(), tokens.next()) {
        (Some(_method), Some(target)) => target,
        (Some(only), None) => only,
        _ => return default,
    };

    target
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| *port != 0)
        .unwrap_or(default)
}
