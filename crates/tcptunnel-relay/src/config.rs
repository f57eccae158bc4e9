//! Tunnel configuration

use crate::backoff::BackoffConfig;
use crate::error::TunnelError;
use crate::tls::TlsSettings;
use std::time::Duration;

/// Default timeout for establishing the proxy connection (TCP connect + TLS)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable configuration shared by the listener loop and every session.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Proxy address (host:port) that accepts HTTP CONNECT
    pub proxy_addr: String,
    /// Destination (host:port) requested through the proxy
    pub destination: String,
    /// TLS settings for the proxy connection, `None` for plain TCP
    pub tls: Option<TlsSettings>,
    /// Bound on dialing the proxy, TLS handshake included
    pub connect_timeout: Duration,
    /// Accept retry policy
    pub backoff: BackoffConfig,
}

impl TunnelConfig {
    /// Create a configuration that reaches the proxy over TLS with the
    /// bundled web PKI roots.
    pub fn new(
        proxy_addr: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self, TunnelError> {
        let proxy_addr = proxy_addr.into();
        let destination = destination.into();

        validate_address(&proxy_addr, "proxy")?;
        validate_address(&destination, "destination")?;

        Ok(Self {
            proxy_addr,
            destination,
            tls: Some(TlsSettings::default()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffConfig::default(),
        })
    }

    /// Replace the TLS settings (`None` dials the proxy over plain TCP)
    pub fn with_tls(mut self, tls: Option<TlsSettings>) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Host part of the proxy address, without IPv6 brackets
    pub fn proxy_host(&self) -> &str {
        host_part(&self.proxy_addr)
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }
}

fn host_part(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Validate address format (should be host:port)
pub fn validate_address(addr: &str, kind: &'static str) -> Result<(), TunnelError> {
    let invalid = |reason: &str| TunnelError::InvalidAddress {
        kind,
        address: addr.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected format: host:port"))?;

    if host.is_empty() || host == "[]" {
        return Err(invalid("host cannot be empty"));
    }

    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(invalid("IPv6 hosts must be enclosed in brackets"));
    }

    port.parse::<u16>()
        .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        // Valid addresses
        assert!(validate_address("proxy.example.com:443", "proxy").is_ok());
        assert!(validate_address("localhost:8080", "proxy").is_ok());
        assert!(validate_address("192.168.1.1:22", "destination").is_ok());
        assert!(validate_address("[::1]:22", "destination").is_ok());

        // Invalid addresses
        assert!(validate_address("proxy.example.com", "proxy").is_err());
        assert!(validate_address("proxy.example.com:", "proxy").is_err());
        assert!(validate_address("proxy.example.com:abc", "proxy").is_err());
        assert!(validate_address(":443", "proxy").is_err());
        assert!(validate_address("::1:22", "destination").is_err());
        assert!(validate_address("", "destination").is_err());
    }

    #[test]
    fn test_invalid_address_error_names_kind() {
        let err = TunnelConfig::new("proxy.example.com:443", "redis").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("destination"));
        assert!(message.contains("redis"));
    }

    #[test]
    fn test_defaults() {
        let config = TunnelConfig::new("proxy.example.com:443", "db.internal:5432").unwrap();
        assert!(config.is_secure());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.proxy_host(), "proxy.example.com");

        let plain = config.with_tls(None);
        assert!(!plain.is_secure());
    }

    #[test]
    fn test_proxy_host_strips_brackets() {
        let config = TunnelConfig::new("[::1]:8443", "db.internal:5432").unwrap();
        assert_eq!(config.proxy_host(), "::1");
    }
}
