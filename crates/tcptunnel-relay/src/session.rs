//! Relay session: dial the proxy, CONNECT, then copy bytes both ways
//!
//! A session moves through `Dialing -> Handshaking -> Relaying -> Closed`
//! and may jump to `Closed` from any state on error or cancellation. It is
//! never retried.

use crate::error::TunnelError;
use crate::handshake::handshake;
use crate::tunnel::Tunnel;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Byte stream to the proxy, plain TCP or TLS
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

pub type BoxedProxyStream = Box<dyn ProxyStream>;

/// Which copy direction finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local->remote"),
            Direction::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

impl Tunnel {
    /// Establish a tunnel via HTTP CONNECT and forward all traffic from/to
    /// `local`.
    ///
    /// Returns `Ok(())` when a copy direction reaches end-of-stream or when
    /// `cancel` fires, whichever happens first. The remote connection is
    /// closed before this returns; `local` is dropped as well.
    pub async fn run<S>(&self, cancel: &CancellationToken, local: S) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = self.config();
        info!(
            dst = %config.destination,
            proxy = %config.proxy_addr,
            secure = config.is_secure(),
            "Opening connection"
        );

        let remote = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled while dialing proxy");
                return Ok(());
            }
            result = self.dial() => result?,
        };

        // `remote` is consumed here and dropped exactly once on every path
        let result = self.handshake_and_relay(cancel, local, remote).await;
        info!("Connection closed");

        result
    }

    async fn handshake_and_relay<S>(
        &self,
        cancel: &CancellationToken,
        local: S,
        mut remote: BoxedProxyStream,
    ) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!("Handshaking with proxy");
        let leftover = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled during CONNECT handshake");
                return Ok(());
            }
            result = handshake(&mut remote, &self.config().destination) => result?,
        };

        info!("Connection established");

        relay(cancel, local, remote, leftover).await
    }

    /// Dial the proxy, over TLS when configured.
    ///
    /// `connect_timeout` bounds the TCP connect and TLS handshake together.
    async fn dial(&self) -> Result<BoxedProxyStream, TunnelError> {
        let config = self.config();
        debug!("Dialing proxy {}", config.proxy_addr);

        tokio::time::timeout(config.connect_timeout, self.connect())
            .await
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connecting to proxy timed out",
                ))
            })
            .map_err(|source| TunnelError::Dial {
                proxy: config.proxy_addr.clone(),
                source,
            })
    }

    async fn connect(&self) -> io::Result<BoxedProxyStream> {
        let stream = TcpStream::connect(&self.config().proxy_addr).await?;

        // Interactive protocols (ssh, redis) suffer from Nagle delays
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on proxy connection: {}", e);
        }

        match self.tls() {
            Some(tls) => {
                let tls_stream = tls
                    .connector
                    .connect(tls.server_name.clone(), stream)
                    .await?;
                Ok(Box::new(tls_stream))
            }
            None => Ok(Box::new(stream)),
        }
    }
}

/// Copy both directions until the first one finishes or `cancel` fires.
async fn relay<S>(
    cancel: &CancellationToken,
    local: S,
    remote: BoxedProxyStream,
    leftover: Vec<u8>,
) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let mut local_to_remote = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut local_read, &mut remote_write).await?;
        remote_write.shutdown().await?;
        Ok::<u64, io::Error>(copied)
    });

    let mut remote_to_local = tokio::spawn(async move {
        local_write.write_all(&leftover).await?;
        let copied = tokio::io::copy(&mut remote_read, &mut local_write).await?;
        local_write.shutdown().await?;
        Ok::<u64, io::Error>(copied + leftover.len() as u64)
    });

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = &mut local_to_remote => Some((Direction::LocalToRemote, result)),
        result = &mut remote_to_local => Some((Direction::RemoteToLocal, result)),
    };

    // Aborting drops the remaining halves, which closes both sockets
    local_to_remote.abort();
    remote_to_local.abort();

    match finished {
        None => {
            debug!("Relay cancelled");
            Ok(())
        }
        Some((direction, Ok(Ok(bytes)))) => {
            debug!(%direction, bytes, "Copy finished");
            Ok(())
        }
        Some((direction, Ok(Err(e)))) => {
            debug!(%direction, error = %e, "Copy failed");
            Err(TunnelError::Relay(e))
        }
        Some((direction, Err(join_error))) => {
            debug!(%direction, error = %join_error, "Copy task failed");
            Err(TunnelError::Relay(io::Error::other(join_error)))
        }
    }
}
