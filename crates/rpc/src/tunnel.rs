//! HTTP CONNECT tunnel carrying the RPC protocol.

use crate::error::{Error, Result};

use httparse::Status;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Path that upgrades an HTTP connection to RPC.
pub const DEFAULT_RPC_PATH: &str = "/_arpc_";

/// Path serving the HTML debug page.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/arpc";

/// Status line (code and reason) confirming a tunnel.
pub const CONNECTED: &str = "200 Connected to aRPC";

const MAX_HEAD_LENGTH: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;

/// Read an HTTP head up to and including the empty line.
///
/// Reads at most one byte past [`MAX_HEAD_LENGTH`], even from a peer that
/// never sends a newline.
pub(crate) async fn read_head<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let mut head = Vec::new();

    loop {
        let remaining = (MAX_HEAD_LENGTH + 1).saturating_sub(head.len()) as u64;
        let read = (&mut *stream)
            .take(remaining)
            .read_until(b'\n', &mut head)
            .await?;
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_LENGTH {
            return Err(Error::Tunnel("HTTP head too large".into()));
        }
        if read == 0 {
            return Err(Error::Tunnel("connection closed before end of HTTP head".into()));
        }
    }
}

/// A parsed request line.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: String,
    pub(crate) path: String,
}

/// Parse a request head read by [`read_head`].
pub(crate) fn parse_request(head: &[u8]) -> Result<RequestHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(head) {
        Ok(Status::Complete(_)) => Ok(RequestHead {
            method: request.method.unwrap_or_default().to_string(),
            path: request.path.unwrap_or_default().to_string(),
        }),
        Ok(Status::Partial) => Err(Error::Tunnel("incomplete HTTP request".into())),
        Err(e) => Err(Error::Tunnel(format!("malformed HTTP request: {e}"))),
    }
}

/// Ask an HTTP server to hand the connection over to RPC.
///
/// The returned stream keeps any bytes buffered past the response head.
///
/// # Errors
///
/// Returns an error if the exchange fails or the server answers with anything
/// other than [`CONNECTED`].
pub async fn connect<S>(stream: S, rpc_path: &str) -> Result<BufReader<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream
        .write_all(format!("CONNECT {rpc_path} HTTP/1.0\r\n\r\n").as_bytes())
        .await?;
    stream.flush().await?;

    let head = read_head(&mut stream).await?;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(&head) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return Err(Error::Tunnel("incomplete HTTP response".into())),
        Err(e) => return Err(Error::Tunnel(format!("malformed HTTP response: {e}"))),
    }

    let status = format!(
        "{} {}",
        response.code.unwrap_or_default(),
        response.reason.unwrap_or_default()
    );
    if status != CONNECTED {
        return Err(Error::Tunnel(format!("unexpected HTTP response: {status}")));
    }

    Ok(stream)
}
