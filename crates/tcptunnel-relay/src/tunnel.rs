use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::tls::TlsClient;
use std::sync::Arc;
use tracing::Span;

struct TunnelInner {
    config: TunnelConfig,
    tls: Option<TlsClient>,
}

/// A TCP tunnel over HTTP CONNECT.
///
/// Cloning is cheap; the configuration and TLS connector are shared
/// read-only by every session spawned from the listener loop.
#[derive(Clone)]
pub struct Tunnel {
    inner: Arc<TunnelInner>,
    span: Span,
}

impl Tunnel {
    /// Create a tunnel, building the TLS connector up front so that
    /// configuration problems surface before the listener starts.
    pub fn new(config: TunnelConfig) -> Result<Self, TunnelError> {
        let tls = match &config.tls {
            Some(settings) => Some(TlsClient::new(settings, config.proxy_host())?),
            None => None,
        };

        let span = tracing::info_span!(
            "tcptunnel",
            proxy = %config.proxy_addr,
            dst = %config.destination,
        );

        Ok(Self {
            inner: Arc::new(TunnelInner { config, tls }),
            span,
        })
    }

    /// Log under `span` instead of the default `tcptunnel` span.
    ///
    /// The listener loop and every session span are created as children of
    /// this span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.inner.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn tls(&self) -> Option<&TlsClient> {
        self.inner.tls.as_ref()
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("config", &self.inner.config)
            .finish()
    }
}
