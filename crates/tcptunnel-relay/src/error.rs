use std::io;
use thiserror::Error;

/// Errors produced by the listener loop and by relay sessions.
///
/// Bind, accept and configuration errors end the listener loop. Every other
/// variant is scoped to a single session and is only logged by the loop.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid {kind} address '{address}': {reason}")]
    InvalidAddress {
        kind: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept local connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to establish connection to proxy {proxy}: {source}")]
    Dial {
        proxy: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Failed to send CONNECT request: {0}")]
    Handshake(#[source] io::Error),

    #[error("Failed to read HTTP response: {0}")]
    MalformedResponse(String),

    #[error("Invalid HTTP response code: {0}")]
    UnexpectedStatus(u16),

    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),
}

impl TunnelError {
    /// True when the error only reports that shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TunnelError::Cancelled)
    }
}
