//! Listener loop: accept local connections and spawn a session for each

use crate::backoff::ExponentialBackoff;
use crate::error::TunnelError;
use crate::tunnel::Tunnel;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Source of local connections for the listener loop
#[async_trait]
pub trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound connection
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address this acceptor is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// A bound listener ready to serve tunnel sessions.
///
/// Dropping it (which `serve` does on every exit path) releases the socket.
pub struct TunnelListener<A: Acceptor = TcpListener> {
    acceptor: A,
    tunnel: Tunnel,
    backoff: ExponentialBackoff,
}

impl Tunnel {
    /// Bind a TCP listener at `address`.
    ///
    /// Port 0 selects any free port; use [`TunnelListener::local_addr`] for
    /// the realized address.
    pub async fn bind(&self, address: &str) -> Result<TunnelListener<TcpListener>, TunnelError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| TunnelError::Bind {
                address: address.to_string(),
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| TunnelError::Bind {
            address: address.to_string(),
            source,
        })?;
        self.span().in_scope(|| info!("Listening on {}", local_addr));

        Ok(self.listener(listener))
    }

    /// Serve sessions from an already bound acceptor
    pub fn listener<A: Acceptor>(&self, acceptor: A) -> TunnelListener<A> {
        TunnelListener {
            acceptor,
            tunnel: self.clone(),
            backoff: ExponentialBackoff::new(self.config().backoff),
        }
    }

    /// Run a listener on `address`; every accepted connection is tunneled
    /// via [`Tunnel::run`] until `cancel` fires.
    pub async fn run_listener(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<(), TunnelError> {
        self.bind(address).await?.serve(cancel).await
    }
}

impl<A: Acceptor> TunnelListener<A> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Accept connections until cancelled or a fatal accept error occurs.
    ///
    /// Returns `Ok(())` when `cancel` fires while waiting for a connection,
    /// and `Err(TunnelError::Cancelled)` when it fires during an accept
    /// retry delay.
    pub async fn serve(self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        let span = self.tunnel.span().clone();
        self.accept_loop(cancel).instrument(span).await
    }

    async fn accept_loop(mut self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutting down listener");
                    return Ok(());
                }
                result = self.acceptor.accept() => result,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    self.backoff.reset();
                    self.spawn_session(stream, peer_addr, cancel.clone());
                }
                // canceled, so ignore the error and return
                Err(_) if cancel.is_cancelled() => return Ok(()),
                Err(e) if is_transient_accept_error(&e) => {
                    let delay = self.backoff.next_backoff();
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Temporarily failed to accept local connection"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TunnelError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!("Failed to accept local connection: {}", e);
                    return Err(TunnelError::Accept(e));
                }
            }
        }
    }

    fn spawn_session(&self, stream: A::Stream, peer_addr: SocketAddr, cancel: CancellationToken) {
        let tunnel = self.tunnel.clone();
        let session_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            parent: tunnel.span(),
            "session",
            peer = %peer_addr,
            session = %session_id,
        );

        debug!("New local connection from {}", peer_addr);

        tokio::spawn(
            async move {
                // `stream` moves into the session and is closed when it returns
                if let Err(e) = tunnel.run(&cancel, stream).await {
                    error!(error = %e, "Error serving local connection");
                }
            }
            .instrument(span),
        );
    }
}

/// Accept errors that are expected to resolve on retry.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) {
        return true;
    }

    // Descriptor and buffer exhaustion
    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            return matches!(
                code,
                libc::ENOMEM | libc::ENFILE | libc::EMFILE | libc::ENOBUFS
            );
        }
    }

    false
}
