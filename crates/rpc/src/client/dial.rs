//! Connecting clients to servers.

use super::Client;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::tunnel::{self, DEFAULT_RPC_PATH};

use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Bound connection setup by the connect timeout; zero means unbounded.
async fn with_connect_timeout<F>(timeout: Duration, setup: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return setup.await;
    }

    tokio::time::timeout(timeout, setup)
        .await
        .map_err(|_| Error::ConnectTimeout(timeout))?
}

/// Connect to an RPC server over TCP.
///
/// # Errors
///
/// Returns an error if the connection or handshake fails, or if they take
/// longer than [`Options::connect_timeout`].
pub async fn dial<A: ToSocketAddrs>(addr: A, options: Options) -> Result<Client> {
    with_connect_timeout(options.connect_timeout, async move {
        let stream = TcpStream::connect(addr).await?;
        debug!("rpc client: connected to {:?}", stream.peer_addr());
        Client::new(stream, options).await
    })
    .await
}

/// Connect to an RPC server behind its HTTP front end.
///
/// # Errors
///
/// As [`dial`], and also if the server refuses the tunnel.
pub async fn dial_http<A: ToSocketAddrs>(addr: A, options: Options) -> Result<Client> {
    with_connect_timeout(options.connect_timeout, async move {
        let stream = TcpStream::connect(addr).await?;
        let stream = tunnel::connect(stream, DEFAULT_RPC_PATH).await?;
        debug!("rpc client: tunnel established to {:?}", stream.get_ref().peer_addr());
        Client::new(stream, options).await
    })
    .await
}

/// Connect using an address of the form `protocol@addr`.
///
/// `http@host:port` goes through the HTTP tunnel; any other protocol, such as
/// `tcp`, dials directly.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] for a malformed address, otherwise as
/// [`dial`] and [`dial_http`].
pub async fn xdial(rpc_addr: &str, options: Options) -> Result<Client> {
    let (protocol, addr) = parse_rpc_addr(rpc_addr)?;

    match protocol {
        "http" => dial_http(addr, options).await,
        _ => dial(addr, options).await,
    }
}

fn parse_rpc_addr(rpc_addr: &str) -> Result<(&str, &str)> {
    match rpc_addr.split_once('@') {
        Some((protocol, addr)) if !protocol.is_empty() && !addr.is_empty() && !addr.contains('@') => {
            Ok((protocol, addr))
        }
        _ => Err(Error::InvalidAddress(rpc_addr.to_string())),
    }
}
