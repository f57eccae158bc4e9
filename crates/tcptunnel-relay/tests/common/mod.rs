//! In-process HTTP CONNECT proxy used by the integration tests

#![allow(dead_code)]

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// How the mock proxy answers one CONNECT request
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200, then echo every byte back
    Echo,
    /// 200 and `data` in the same write, then close
    SendAndClose(Vec<u8>),
    /// Non-200 status line, then record anything the client still sends
    Status(u16),
    /// Something that is not HTTP
    Garbage,
}

/// What one proxied connection looked like from the proxy side
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub index: usize,
    pub request: String,
    /// Tunnel bytes received after the response was sent
    pub received: Vec<u8>,
}

pub struct MockProxy {
    pub addr: SocketAddr,
    reports: mpsc::UnboundedReceiver<ConnectionReport>,
    handle: JoinHandle<()>,
}

impl MockProxy {
    /// Plain TCP proxy; `reply` picks the behavior by connection index.
    pub async fn start<F>(reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(None, reply).await
    }

    /// Plain TCP proxy on a specific address
    pub async fn start_on<F>(addr: SocketAddr, reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, None, reply)
    }

    /// Proxy behind TLS.
    pub async fn start_tls<F>(acceptor: TlsAcceptor, reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Some(acceptor), reply).await
    }

    async fn spawn<F>(acceptor: Option<TlsAcceptor>, reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, acceptor, reply)
    }

    fn serve<F>(listener: TcpListener, acceptor: Option<TlsAcceptor>, reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        let addr = listener.local_addr().unwrap();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let reply = Arc::new(reply);
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let behavior = reply(index);
                let report_tx = report_tx.clone();
                let acceptor = acceptor.clone();

                tokio::spawn(async move {
                    let report = match acceptor {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(tls) => handle_connection(tls, index, behavior).await,
                            Err(_) => return,
                        },
                        None => handle_connection(socket, index, behavior).await,
                    };
                    let _ = report_tx.send(report);
                });
            }
        });

        Self {
            addr,
            reports,
            handle,
        }
    }

    /// Wait for the next finished connection
    pub async fn next_report(&mut self) -> ConnectionReport {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.reports.recv())
            .await
            .expect("proxy connection did not finish in time")
            .expect("proxy stopped")
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection<S>(mut stream: S, index: usize, reply: Reply) -> ConnectionReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_head(&mut stream).await;

    let received = match reply {
        Reply::Echo => {
            let _ = stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await;
            echo(&mut stream).await
        }
        Reply::SendAndClose(data) => {
            let mut response = b"HTTP/1.1 200 Connection established\r\n\r\n".to_vec();
            response.extend_from_slice(&data);
            let _ = stream.write_all(&response).await;
            let _ = stream.shutdown().await;
            Vec::new()
        }
        Reply::Status(code) => {
            let response = format!(
                "HTTP/1.1 {} Proxy Error\r\nContent-Length: 0\r\n\r\n",
                code
            );
            let _ = stream.write_all(response.as_bytes()).await;
            drain(&mut stream).await
        }
        Reply::Garbage => {
            let _ = stream.write_all(b"SSH-2.0-NotAProxy\r\n\r\n").await;
            drain(&mut stream).await
        }
    };

    ConnectionReport {
        index,
        request,
        received,
    }
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).to_string()
}

async fn echo<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    received
}

async fn drain<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    received
}

/// TLS acceptor with a fresh self-signed certificate for `localhost`
pub fn tls_acceptor() -> (TlsAcceptor, CertificateDer<'static>) {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();

    (TlsAcceptor::from(Arc::new(config)), cert_der)
}

/// Deterministic payload so misordered or interleaved bytes are caught
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add((i % 251) as u8))
        .collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
