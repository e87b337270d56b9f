//! Pairwise - pair two devices with a short code and mutual TLS.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pairwise_auth::{IdentityId, Secret};
use pairwise_daemon::discovery::{Discovery, PeerAddr};
use pairwise_daemon::http::{Handler, Server, ServerOptions};
use pairwise_daemon::services::{
    Issuer, Joiner, PairingService, PeeringError, Role, TrustedPeerService, fetch_peer_facts,
};
use pairwise_daemon::tls::{ClientAuth, TlsServerConfig};
use pairwise_daemon::{LocalNode, NodeConfig};
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Pairwise - device pairing over a restricted HTTPS transport
#[derive(Parser)]
#[command(name = "pairwise", version, about)]
struct Cli {
    /// Config file (defaults to $PAIRWISE_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print this device's identity id
    Id,

    /// Pair a new device: show a code and sign its certificate
    Offer {
        /// Peer as ID@HOST:PORT, or an id listed in the config's peers
        #[arg(long)]
        peer: String,
    },

    /// Join an existing device using the code it shows
    Join {
        /// Peer as ID@HOST:PORT, or an id listed in the config's peers
        #[arg(long)]
        peer: String,

        /// The 8-character code (prompted for if omitted)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Accept connections from devices this one has paired
    Serve,

    /// Check that the certificate a peer issued us works
    Ping {
        /// Peer as ID@HOST:PORT, or an id listed in the config's peers
        #[arg(long)]
        peer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = NodeConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let node = LocalNode::load_or_init(&data_dir, config.host.clone(), config.user.clone())
        .context("Failed to open node identity")?;

    match cli.command {
        Commands::Id => {
            println!("{}", node.id());
            Ok(())
        }
        Commands::Offer { peer } => cmd_offer(&config, &node, &peer).await,
        Commands::Join { peer, secret } => cmd_join(&config, &node, &peer, secret).await,
        Commands::Serve => cmd_serve(&config, &node).await,
        Commands::Ping { peer } => cmd_ping(&config, &node, &peer).await,
    }
}

/// Resolve `ID@HOST:PORT` directly, or a bare id through the configured peers.
fn resolve_peer(config: &NodeConfig, spec: &str) -> Result<PeerAddr> {
    if spec.contains('@') {
        return spec.parse().context("Invalid --peer");
    }
    let id = IdentityId::parse(spec.trim()).context("Invalid --peer")?;
    let discovery = config.discovery().context("Invalid peers in config")?;
    discovery
        .find(&id)
        .with_context(|| format!("No address known for peer {id}; pass ID@HOST:PORT"))
}

/// Bind the listener and serve in the background until `shutdown` fires.
async fn spawn_server<H: Handler>(
    config: &NodeConfig,
    tls: TlsServerConfig,
    handler: Arc<H>,
    options: ServerOptions,
) -> Result<(oneshot::Sender<()>, JoinHandle<()>)> {
    let server = Server::bind(config.listen, Some(tls), handler, options)
        .await
        .context("Failed to start listener")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = server.run_until(shutdown).await {
            tracing::error!(error = %e, "Listener failed");
        }
    });
    Ok((shutdown_tx, task))
}

fn show_secret(secret: &Secret) {
    println!();
    println!("Pairing code: {}", secret.encode().as_str());
    println!("Enter it on the other device with `pairwise join`.");
    println!();
}

async fn prompt_secret() -> Result<Secret> {
    loop {
        let line = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
            print!("Pairing code: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line)
        })
        .await
        .context("Prompt task failed")??;

        if line.is_empty() {
            anyhow::bail!("No pairing code entered");
        }
        match Secret::parse(&line) {
            Ok(secret) => return Ok(secret),
            Err(_) => eprintln!("A pairing code is 8 letters and digits (2-7)."),
        }
    }
}

async fn cmd_offer(config: &NodeConfig, node: &LocalNode, peer: &str) -> Result<()> {
    let peer = resolve_peer(config, peer)?;
    let service = Arc::new(PairingService::new(
        node.info(),
        peer.id.clone(),
        Role::Issuer {
            pki: node.pki().clone(),
        },
    ));
    let tls = node.server_tls(&ClientAuth::Pinned(peer.id.clone()))?;
    let (shutdown, server) =
        spawn_server(config, tls, service.clone(), config.server_options()).await?;

    show_secret(&service.regenerate_secret());

    let mut issuer = Issuer::new(
        service.clone(),
        peer.clone(),
        node.client_identity()?,
        node.pki().clone(),
        config.peering_timeouts(),
    );
    let result = loop {
        match issuer.run().await {
            Err(PeeringError::WrongSecret) => {
                eprintln!("{}", PeeringError::WrongSecret);
                show_secret(&service.regenerate_secret());
            }
            other => break other,
        }
    };

    let _ = shutdown.send(());
    let _ = server.await;

    result.with_context(|| format!("Pairing with {} failed", peer.id))?;
    println!("Paired with {}.", peer.id);
    Ok(())
}

async fn cmd_join(
    config: &NodeConfig,
    node: &LocalNode,
    peer: &str,
    secret: Option<String>,
) -> Result<()> {
    let peer = resolve_peer(config, peer)?;
    let secret = match secret {
        Some(code) => Secret::parse(&code).context("Invalid --secret")?,
        None => prompt_secret().await?,
    };

    let service = Arc::new(PairingService::new(
        node.info(),
        peer.id.clone(),
        Role::Joiner,
    ));
    service.set_secret(secret);

    let tls = node.server_tls(&ClientAuth::Pinned(peer.id.clone()))?;
    let (shutdown, server) =
        spawn_server(config, tls, service.clone(), config.server_options()).await?;

    let mut joiner = Joiner::new(
        service.clone(),
        peer.clone(),
        node.client_identity()?,
        node.pki().clone(),
        config.peering_timeouts(),
    );
    let result = loop {
        match joiner.run().await {
            Err(PeeringError::WrongSecret) => {
                eprintln!("{}", PeeringError::WrongSecret);
                match prompt_secret().await {
                    Ok(secret) => service.set_secret(secret),
                    Err(e) => break Err(e),
                }
            }
            other => break other.map_err(anyhow::Error::from),
        }
    };

    let _ = shutdown.send(());
    let _ = server.await;

    result.with_context(|| format!("Joining {} failed", peer.id))?;
    println!("Joined {}. Certificate stored.", peer.id);
    Ok(())
}

async fn cmd_serve(config: &NodeConfig, node: &LocalNode) -> Result<()> {
    let tls = node.trusted_server_tls()?;
    let handler = Arc::new(TrustedPeerService::new(node.id().clone()));
    let server = Server::bind(config.listen, Some(tls), handler, config.server_options())
        .await
        .context("Failed to start listener")?;
    tracing::info!(id = %node.id(), "Serving paired devices");

    server.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn cmd_ping(config: &NodeConfig, node: &LocalNode, peer: &str) -> Result<()> {
    let peer = resolve_peer(config, peer)?;
    let identity = node
        .trusted_identity(&peer.id)
        .with_context(|| format!("No certificate from {}; pair first", peer.id))?;
    let facts = fetch_peer_facts(&peer, &identity, config.peering_timeouts().handshake)
        .await
        .with_context(|| format!("Failed to reach {peer}"))?;
    println!("{}", serde_json::to_string_pretty(&facts)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
