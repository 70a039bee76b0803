use std::path::PathBuf;

use clap::Parser;
use iris::{IrisConfig, Node, NodeBuilder, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A replicated key-value registry service with live change notification.
#[derive(Parser, Debug)]
#[command(name = "iris", version, about)]
struct Args {
    /// Disable SSL, allowing unencrypted communication with this service.
    #[arg(long)]
    insecure: bool,

    /// Path to the certificate file for the server.
    #[arg(long)]
    cert: Option<String>,

    /// Path to the private key file for the server.
    #[arg(long)]
    key: Option<String>,

    /// Path to the certificate authority root used on proxy dials.
    #[arg(long)]
    ca: Option<String>,

    /// Expected common name of peer servers.
    #[arg(long = "serverName")]
    server_name: Option<String>,

    /// Client-facing RPC port; the log transport binds the next port up.
    #[arg(long)]
    port: Option<u16>,

    /// Directory used to store replicated log data.
    #[arg(long)]
    raftdir: Option<PathBuf>,

    /// Address of an existing cluster member to join. When absent, this node
    /// bootstraps as the leader of a new cluster.
    #[arg(long)]
    join: Option<String>,
}

impl Args {
    fn apply(self, config: &mut IrisConfig) {
        if self.insecure {
            config.tls.insecure = true;
        }
        if let Some(cert) = self.cert {
            config.tls.certificate_path = cert;
        }
        if let Some(key) = self.key {
            config.tls.private_key_path = key;
        }
        if let Some(ca) = self.ca {
            config.tls.certificate_authority_path = ca;
        }
        if let Some(server_name) = self.server_name {
            config.tls.server_name = server_name;
        }
        if let Some(port) = self.port {
            config.cluster.service_port = port;
        }
        if let Some(raftdir) = self.raftdir {
            config.cluster.raft_dir = raftdir;
        }
        if let Some(join) = self.join {
            config.cluster.join_address = Some(join);
        }
    }
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return 1;
        }
    };

    let (graceful_tx, graceful_rx) = watch::channel(());
    let node = match start_node(config, graceful_rx).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "failed to start node");
            return 1;
        }
    };

    info!(
        port = node.config().cluster.service_port,
        secured = !node.config().tls.insecure,
        "iris started"
    );

    tokio::select! {
        _ = interrupt() => {
            info!("interrupted by signal, shutting down");
            let _ = graceful_tx.send(());
            2
        }
        result = node.run() => match result {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "node stopped");
                1
            }
        }
    }
}

fn load_config(args: Args) -> Result<IrisConfig> {
    let mut config = IrisConfig::load_unvalidated()?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn start_node(config: IrisConfig, shutdown: watch::Receiver<()>) -> Result<Node> {
    NodeBuilder::new(config, shutdown)
        .build()
        .await?
        .start_rpc_server()
        .await?
        .ready()
}

async fn interrupt() {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
}
