//! Calls through the HTTP CONNECT front end

use std::net::SocketAddr;
use std::sync::Arc;

use arpc::{Options, Server, ServerConfig, ServiceBuilder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Arith;

async fn start_http_server(config: ServerConfig) -> SocketAddr {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let server = Server::new(config);
    server
        .register(
            ServiceBuilder::new(Arith)
                .unwrap()
                .method("Add", |_: &Arith, args: (i64, i64), reply: &mut i64| {
                    *reply = args.0 + args.1;
                    Ok::<(), String>(())
                })
                .unwrap()
                .build(),
        )
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::new(server).serve_http(listener));

    addr
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.0\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_add_over_http_tunnel() {
    let addr = start_http_server(ServerConfig::default()).await;

    let client = arpc::dial_http(addr, Options::default()).await.unwrap();
    let sum: i64 = client.call("Arith.Add", &(2, 3)).await.unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn test_xdial_picks_transport() {
    let addr = start_http_server(ServerConfig::default()).await;

    let client = arpc::xdial(&format!("http@{addr}"), Options::default())
        .await
        .unwrap();
    let sum: i64 = client.call("Arith.Add", &(40, 2)).await.unwrap();
    assert_eq!(sum, 42);

    let err = arpc::xdial(&addr.to_string(), Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, arpc::Error::InvalidAddress(_)));
}

#[tokio::test]
async fn test_debug_page_counts_calls() {
    let addr = start_http_server(ServerConfig::default()).await;

    let client = arpc::dial_http(addr, Options::default()).await.unwrap();
    for _ in 0..3 {
        let _: i64 = client.call("Arith.Add", &(1, 1)).await.unwrap();
    }

    let page = http_get(addr, "/debug/arpc").await;
    assert!(page.starts_with("HTTP/1.0 200 OK"));
    assert!(page.contains("Arith.Add"));
    assert!(page.contains("<td align=center>3</td>"));
}

#[tokio::test]
async fn test_rpc_path_rejects_get() {
    let addr = start_http_server(ServerConfig::default()).await;

    let response = http_get(addr, "/_arpc_").await;
    assert!(response.starts_with("HTTP/1.0 405"));
    assert!(response.contains("must CONNECT"));
}

#[tokio::test]
async fn test_custom_rpc_path() {
    let config = ServerConfig {
        rpc_path: "/rpc".to_string(),
        ..ServerConfig::default()
    };
    let addr = start_http_server(config).await;

    // The client always asks for the default path.
    let err = arpc::dial_http(addr, Options::default()).await.unwrap_err();
    assert!(err.to_string().contains("unexpected HTTP response"));

    let stream = TcpStream::connect(addr).await.unwrap();
    let stream = arpc::tunnel::connect(stream, "/rpc").await.unwrap();
    let client = arpc::Client::new(stream, Options::default()).await.unwrap();
    let sum: i64 = client.call("Arith.Add", &(2, 2)).await.unwrap();
    assert_eq!(sum, 4);
}
