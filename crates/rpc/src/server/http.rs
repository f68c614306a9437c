//! HTTP front end: CONNECT tunnels into RPC plus the debug page.

use super::{Server, debug_page};
use crate::error::Result;
use crate::tunnel::{self, CONNECTED};

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

impl Server {
    /// Accept HTTP connections until the listener fails.
    ///
    /// `CONNECT` on the RPC path is answered with [`CONNECTED`] and the
    /// connection is then served as raw RPC. `GET` on the debug path returns
    /// an HTML summary of the registered services.
    ///
    /// # Errors
    ///
    /// Returns the listener's error.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "rpc server: serving HTTP on {:?} (rpc path {}, debug path {})",
            listener.local_addr(),
            self.config.rpc_path,
            self.config.debug_path
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_http_conn(stream).await {
                            warn!("rpc server: HTTP connection from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("rpc server: accept error: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Serve one HTTP connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the request head cannot be read or the response
    /// cannot be written.
    pub async fn serve_http_conn<S>(self: Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut stream = BufReader::new(stream);
        let head = tunnel::read_head(&mut stream).await?;

        let request = match tunnel::parse_request(&head) {
            Ok(request) => request,
            Err(e) => {
                write_plain(&mut stream, "400 Bad Request", &e.to_string()).await?;
                return Err(e);
            }
        };
        debug!("rpc server: HTTP {} {}", request.method, request.path);

        if request.path == self.config.rpc_path {
            if request.method != "CONNECT" {
                return write_plain(&mut stream, "405 Method Not Allowed", "405 must CONNECT\n")
                    .await;
            }

            stream
                .write_all(format!("HTTP/1.0 {CONNECTED}\r\n\r\n").as_bytes())
                .await?;
            stream.flush().await?;

            self.serve_conn(stream).await;
            return Ok(());
        }

        if request.path == self.config.debug_path && request.method == "GET" {
            let page = debug_page::render(&self.services());
            let response = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{page}",
                page.len()
            );
            stream.write_all(response.as_bytes()).await?;
            stream.shutdown().await?;
            return Ok(());
        }

        write_plain(&mut stream, "404 Not Found", "404 page not found\n").await
    }
}

async fn write_plain<S: AsyncWrite + Unpin>(stream: &mut S, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.0 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceBuilder;
    use tokio::io::{AsyncReadExt, duplex};

    struct Echo;

    fn server() -> Arc<Server> {
        let server = Server::default();
        let service = ServiceBuilder::new(Echo)
            .unwrap()
            .method("Say", |_: &Echo, said: String, reply: &mut String| -> std::result::Result<(), String> {
                *reply = said;
                Ok(())
            })
            .unwrap()
            .build();
        server.register(service).unwrap();
        Arc::new(server)
    }

    async fn exchange(request: &str) -> String {
        let (mut client, remote) = duplex(64 * 1024);
        tokio::spawn(server().serve_http_conn(remote));

        client.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_rpc_path_requires_connect() {
        let response = exchange("GET /_arpc_ HTTP/1.0\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.0 405"));
        assert!(response.ends_with("405 must CONNECT\n"));
    }

    #[tokio::test]
    async fn test_debug_page_lists_services() {
        let response = exchange("GET /debug/arpc HTTP/1.0\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.0 200 OK"));
        assert!(response.contains("Service Echo"));
        assert!(response.contains("Say"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let response = exchange("GET /elsewhere HTTP/1.0\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.0 404"));
    }
}
