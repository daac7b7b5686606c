//! TLS termination with the default policy and a checked-in certificate.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use p3y::net::tls;
use p3y::{ProxyConfig, ProxyServer, Shutdown};
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

mod common;

const ALPN_H2: &[u8] = b"h2";
const ALPN_HTTP1: &[u8] = b"http/1.1";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

struct TlsProxy {
    addr: SocketAddr,
    backend: common::EchoBackend,
    _shutdown: Shutdown,
}

async fn start_tls_proxy() -> TlsProxy {
    let backend = common::start_echo_backend().await;
    let server = ProxyServer::new(&ProxyConfig {
        backend: backend.url(),
        tls: true,
        ..ProxyConfig::default()
    })
    .unwrap();

    let policy = tls::load_policy(None).unwrap();
    let tls_config =
        tls::load_tls_config(&policy, &fixture("server.crt"), &fixture("server.key")).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run_tls(listener, tls_config, rx).await;
    });

    TlsProxy {
        addr,
        backend,
        _shutdown: shutdown,
    }
}

fn client_connection(alpn: &[&[u8]]) -> ClientConnection {
    let mut roots = RootCertStore::empty();
    let mut reader = BufReader::new(File::open(fixture("ca.crt")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }

    let mut config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let name = ServerName::try_from("localhost").unwrap();
    ClientConnection::new(Arc::new(config), name).unwrap()
}

fn connect(addr: SocketAddr) -> TcpStream {
    let socket = TcpStream::connect(addr).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    socket
}

/// Send a GET over TLS; returns the negotiated protocol and the response head.
fn https_get(addr: SocketAddr, path: &str) -> (Option<Vec<u8>>, String) {
    let conn = client_connection(&[ALPN_H2, ALPN_HTTP1]);
    let mut stream = StreamOwned::new(conn, connect(addr));
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    stream.flush().unwrap();

    let mut head = Vec::new();
    let mut chunk = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let alpn = stream.conn.alpn_protocol().map(<[u8]>::to_vec);
    (alpn, String::from_utf8_lossy(&head).into_owned())
}

/// Run only the handshake, offering `alpn`.
fn handshake(addr: SocketAddr, alpn: &[&[u8]]) -> io::Result<Option<Vec<u8>>> {
    let mut conn = client_connection(alpn);
    let mut socket = connect(addr);
    while conn.is_handshaking() {
        conn.complete_io(&mut socket)?;
    }
    Ok(conn.alpn_protocol().map(<[u8]>::to_vec))
}

#[tokio::test]
async fn tls_requests_are_forwarded_over_http1() {
    let proxy = start_tls_proxy().await;
    let addr = proxy.addr;

    let (alpn, head) = tokio::task::spawn_blocking(move || https_get(addr, "/secure"))
        .await
        .unwrap();

    assert_eq!(alpn.as_deref(), Some(ALPN_HTTP1));
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert_eq!(proxy.backend.hits(), 1);
}

#[tokio::test]
async fn http2_only_clients_are_refused() {
    let proxy = start_tls_proxy().await;
    let addr = proxy.addr;

    let result = tokio::task::spawn_blocking(move || handshake(addr, &[ALPN_H2]))
        .await
        .unwrap();

    assert!(result.is_err(), "negotiated {result:?}");
}

#[tokio::test]
async fn clients_without_alpn_still_connect() {
    let proxy = start_tls_proxy().await;
    let addr = proxy.addr;

    let alpn = tokio::task::spawn_blocking(move || handshake(addr, &[]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(alpn, None);
}

#[tokio::test]
async fn plaintext_requests_are_rejected() {
    let proxy = start_tls_proxy().await;

    let result = common::client()
        .get(format!("http://{}/", proxy.addr))
        .send()
        .await;

    assert!(result.is_err());
    assert_eq!(proxy.backend.hits(), 0);
}
