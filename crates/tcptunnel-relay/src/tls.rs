//! TLS settings for the proxy connection

use crate::error::TunnelError;
use rustls::pki_types::{CertificateDer, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// How to secure the connection to the proxy.
///
/// The default verifies the proxy certificate against the bundled web PKI
/// roots and sends the proxy host as SNI.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Server name to verify and send as SNI (defaults to the proxy host)
    pub server_name: Option<String>,
    /// PEM file with root certificates, replacing the bundled roots
    pub ca_cert_path: Option<PathBuf>,
    /// In-memory root certificates, added next to `ca_cert_path`
    pub root_certs: Vec<CertificateDer<'static>>,
    /// Skip certificate verification (insecure, for development only)
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_root_cert(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certs.push(cert);
        self
    }

    /// Disable server certificate verification (INSECURE - only for testing!)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    fn uses_custom_roots(&self) -> bool {
        self.ca_cert_path.is_some() || !self.root_certs.is_empty()
    }
}

/// A ready-to-use TLS client for one proxy.
#[derive(Clone)]
pub(crate) struct TlsClient {
    pub(crate) connector: TlsConnector,
    pub(crate) server_name: ServerName<'static>,
}

impl TlsClient {
    pub(crate) fn new(settings: &TlsSettings, proxy_host: &str) -> Result<Self, TunnelError> {
        let name = settings.server_name.as_deref().unwrap_or(proxy_host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| TunnelError::Tls(format!("Invalid server name '{}': {}", name, e)))?;

        let connector = if settings.insecure_skip_verify {
            build_insecure_tls_connector()
        } else {
            build_tls_connector(settings)?
        };

        Ok(Self {
            connector,
            server_name,
        })
    }
}

fn build_tls_connector(settings: &TlsSettings) -> Result<TlsConnector, TunnelError> {
    ensure_crypto_provider();

    let mut roots = rustls::RootCertStore::empty();

    if settings.uses_custom_roots() {
        let mut certs = settings.root_certs.clone();
        if let Some(path) = &settings.ca_cert_path {
            certs.extend(load_pem_certs(path)?);
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| TunnelError::Tls(format!("Invalid root cert: {}", e)))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn build_insecure_tls_connector() -> TlsConnector {
    ensure_crypto_provider();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipVerification))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TunnelError> {
    let file = File::open(path).map_err(|e| {
        TunnelError::Tls(format!("Failed to open CA file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TunnelError::Tls(format!("Failed to parse CA file {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(TunnelError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        // An error only means another provider was installed first
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// Accepts any proxy certificate; only reachable through `insecure_skip_verify`
#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
