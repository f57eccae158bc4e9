//! tcptunnel - reach TCP services behind an HTTP CONNECT proxy
//!
//! Binds a local port and tunnels every connection to a fixed destination
//! through the proxy.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tcptunnel_auth::{AuthClientConfig, LocalCache};
use tcptunnel_relay::Tunnel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

/// tcptunnel - tunnel local TCP connections through an HTTP CONNECT proxy
#[derive(Parser, Debug)]
#[command(name = "tcptunnel")]
#[command(version = env!("TCPTUNNEL_VERSION"))]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen locally and tunnel every connection to a destination
    #[command(long_about = r#"
Listen on a local address and tunnel every accepted connection to DESTINATION
through the HTTP CONNECT proxy at PROXY. The proxy is reached over TLS unless
--no-tls is given.

EXAMPLES:
  # Reach a database behind the proxy on a fixed local port
  tcptunnel tcp --proxy proxy.example.com:443 \
    --destination db.internal:5432 --listen 127.0.0.1:15432

  # Plain-text proxy inside a trusted network
  tcptunnel tcp --proxy 10.0.0.5:3128 --destination redis:6379 --no-tls

  # All settings from a file
  tcptunnel tcp --config tunnel.yaml

ENVIRONMENT VARIABLES:
  TCPTUNNEL_PROXY        Proxy address (host:port)
  TCPTUNNEL_DESTINATION  Destination address (host:port)
  TCPTUNNEL_LISTEN       Local listen address
"#)]
    Tcp(TcpArgs),

    /// Manage cached authentication tokens
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Args, Debug)]
pub struct TcpArgs {
    /// Local address to listen on (port 0 picks a free port)
    #[arg(long, env = "TCPTUNNEL_LISTEN")]
    pub listen: Option<String>,

    /// HTTP CONNECT proxy address (host:port)
    #[arg(long, env = "TCPTUNNEL_PROXY")]
    pub proxy: Option<String>,

    /// Destination requested through the proxy (host:port)
    #[arg(long, env = "TCPTUNNEL_DESTINATION")]
    pub destination: Option<String>,

    /// Connect to the proxy over plain TCP
    #[arg(long)]
    pub no_tls: bool,

    /// Server name to verify instead of the proxy host
    #[arg(long)]
    pub tls_server_name: Option<String>,

    /// PEM file with CA certificates to trust for the proxy
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Skip certificate verification (insecure, for development only)
    #[arg(long)]
    pub insecure: bool,

    /// Seconds allowed for connecting to the proxy
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Save a token for a server
    Store {
        #[arg(long)]
        server_url: Url,

        #[arg(long)]
        token: String,
    },
    /// Print the cached token for a server if it is still valid
    Show {
        #[arg(long)]
        server_url: Url,
    },
    /// Print where the token for a server is cached
    Path {
        #[arg(long)]
        server_url: Url,
    },
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Wait for Ctrl+C (or SIGTERM/SIGHUP on Unix), then cancel `cancel`.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let streams = signal(SignalKind::terminate())
            .and_then(|term| Ok((term, signal(SignalKind::hangup())?)));
        match streams {
            Ok((mut term, mut hangup)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = hangup.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal, closing tunnel...");
    cancel.cancel();
}

async fn run_tcp(args: TcpArgs) -> Result<()> {
    let resolved = config::resolve(&args).context("Failed to build tunnel configuration")?;

    let tunnel = Tunnel::new(resolved.tunnel).context("Failed to create tunnel")?;
    let listener = tunnel.bind(&resolved.listen).await?;
    let local_addr = listener.local_addr()?;
    info!(
        "Forwarding {} -> {} via {}",
        local_addr,
        tunnel.config().destination,
        tunnel.config().proxy_addr
    );

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown_signal(cancel.clone()));

    let result = listener.serve(&cancel).await;
    cancel.cancel();
    let _ = signal_task.await;

    match result {
        Ok(()) => {
            info!("Tunnel stopped");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            info!("Tunnel stopped");
            Ok(())
        }
        Err(e) => {
            error!("Tunnel stopped: {}", e);
            Err(e.into())
        }
    }
}

fn run_token(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Store { server_url, token } => {
            let auth = AuthClientConfig::new().with_server_url(server_url.clone());
            auth.cache()?
                .store(&server_url, token.trim())
                .context("Failed to store token")?;
            info!("Stored token for {}", server_url);
        }
        TokenCommand::Show { server_url } => {
            let auth = AuthClientConfig::new().with_server_url(server_url.clone());
            let token = auth
                .cached_token()
                .with_context(|| format!("No usable token for {}", server_url))?;
            println!("{}", token);
        }
        TokenCommand::Path { server_url } => {
            let cache = LocalCache::new()?;
            println!("{}", cache.token_path(&server_url).display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Tcp(args) => run_tcp(args).await,
        Commands::Token(command) => run_token(command),
    }
}
