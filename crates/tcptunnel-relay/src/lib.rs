//! TCP tunnel over HTTP CONNECT
//!
//! Binds a local listener and, for every accepted connection, dials an HTTP
//! CONNECT proxy (optionally over TLS), asks it for a fixed destination and
//! relays bytes both ways until either side closes or the shared
//! cancellation token fires.
//!
//! ```no_run
//! use tcptunnel_relay::{Tunnel, TunnelConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), tcptunnel_relay::TunnelError> {
//! let config = TunnelConfig::new("proxy.example.com:443", "db.internal:5432")?;
//! let tunnel = Tunnel::new(config)?;
//! tunnel.run_listener(&CancellationToken::new(), "127.0.0.1:0").await
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod session;
pub mod tls;
mod tunnel;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use config::{validate_address, TunnelConfig, DEFAULT_CONNECT_TIMEOUT};
pub use error::TunnelError;
pub use listener::{is_transient_accept_error, Acceptor, TunnelListener};
pub use session::{BoxedProxyStream, ProxyStream};
pub use tls::TlsSettings;
pub use tunnel::Tunnel;

pub use tokio_util::sync::CancellationToken;
