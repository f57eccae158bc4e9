//! YAML configuration file and its merge with command-line flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tcptunnel_relay::{BackoffConfig, TlsSettings, TunnelConfig};
use tracing::info;

use crate::TcpArgs;

/// Default local listen address; port 0 picks any free port
pub const DEFAULT_LISTEN: &str = "127.0.0.1:0";

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    #[serde(default)]
    pub tls: TlsFileConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub backoff: BackoffFileConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsFileConfig {
    /// Dial the proxy over TLS (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Name to verify instead of the proxy host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// PEM bundle replacing the bundled web PKI roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

/// Everything the `tcp` command needs to start
#[derive(Debug)]
pub struct ResolvedConfig {
    pub listen: String,
    pub tunnel: TunnelConfig,
}

/// Load configuration from YAML file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Merge CLI args with the config file, giving precedence to CLI args
pub fn resolve(args: &TcpArgs) -> Result<ResolvedConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    merge(args, file)
}

fn merge(args: &TcpArgs, file: ConfigFile) -> Result<ResolvedConfig> {
    let proxy = args.proxy.clone().or(file.proxy).ok_or_else(|| {
        anyhow::anyhow!("Proxy address is required (use --proxy or config file)")
    })?;
    let destination = args.destination.clone().or(file.destination).ok_or_else(|| {
        anyhow::anyhow!("Destination address is required (use --destination or config file)")
    })?;
    let listen = args
        .listen
        .clone()
        .or(file.listen)
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

    let tls_enabled = !args.no_tls && file.tls.enabled.unwrap_or(true);
    let tls = tls_enabled.then(|| {
        let mut settings = TlsSettings::default();
        if let Some(name) = args.tls_server_name.clone().or(file.tls.server_name) {
            settings = settings.with_server_name(name);
        }
        if let Some(path) = args.ca_cert.clone().or(file.tls.ca_cert) {
            settings = settings.with_ca_cert_path(path);
        }
        if args.insecure || file.tls.insecure.unwrap_or(false) {
            settings = settings.with_insecure_skip_verify();
        }
        settings
    });

    let mut backoff = BackoffConfig::default();
    if let Some(ms) = file.backoff.initial_ms {
        backoff.initial_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = file.backoff.max_ms {
        backoff.max_interval = Duration::from_millis(ms);
    }
    if let Some(multiplier) = file.backoff.multiplier {
        if multiplier < 1.0 {
            anyhow::bail!("Backoff multiplier must be at least 1.0 (got {})", multiplier);
        }
        backoff.multiplier = multiplier;
    }

    let mut tunnel = TunnelConfig::new(proxy, destination)?
        .with_tls(tls)
        .with_backoff(backoff);
    if let Some(secs) = args.connect_timeout.or(file.connect_timeout_secs) {
        tunnel = tunnel.with_connect_timeout(Duration::from_secs(secs));
    }

    Ok(ResolvedConfig { listen, tunnel })
}
