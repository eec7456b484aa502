//! Minimal HTTP/1.1 response writer
//!
//! Requests are never parsed. The connection is read up to the end of the
//! request head so the client sees its request consumed, then a complete
//! pre-encoded response is written and the connection is closed.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

const MAX_REQUEST_HEAD: usize = 8 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// Encode a `200 OK` response with the given body.
///
/// `Content-Length` is always the byte length of `body` and is written
/// ahead of the body.
pub fn encode_response(content_type: &str, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());
    buf.put_slice(b"HTTP/1.1 200 OK\r\n");
    buf.put_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    buf.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    buf.put_slice(b"Connection: close\r\n\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// Read until the blank line ending the request head, EOF, the size cap or
/// the read timeout. Returns the number of bytes consumed.
pub async fn drain_request_head<S>(stream: &mut S) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut head = BytesMut::with_capacity(1024);
    let read = async {
        let mut chunk = [0u8; 1024];
        while head.len() < MAX_REQUEST_HEAD {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            head.put_slice(&chunk[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        Ok::<_, io::Error>(())
    };

    match tokio::time::timeout(READ_TIMEOUT, read).await {
        Ok(result) => result?,
        Err(_) => log::debug!("Request head not complete after {:?}", READ_TIMEOUT),
    }

    Ok(head.len())
}

/// Serve one connection with a pre-encoded response.
pub async fn respond<S>(mut stream: S, response: Bytes) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    drain_request_head(&mut stream).await?;
    stream.write_all(&response).await?;
    stream.shutdown().await?;

    // Discard whatever the client still sends (request bodies) so closing
    // the socket does not reset the connection before the response is read.
    let _ = tokio::time::timeout(LINGER_TIMEOUT, async {
        let mut sink = [0u8; 1024];
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;

    Ok(())
}
