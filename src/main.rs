//! switchboardd: runs the control plane behind a line-delimited JSON listener.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard::{Config, ControlPlane, LogNotifier, Notify};

#[derive(Debug, Parser)]
#[command(name = "switchboardd", version, about = "Rendering node control plane")]
struct Args {
    /// YAML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `listen_addr`.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides()
    .context("applying environment overrides")?;
    if let Some(addr) = args.listen {
        cfg.listen_addr = addr;
    }

    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;

    let notifiers: Vec<Arc<dyn Notify>> = vec![Arc::new(LogNotifier::new())];
    let plane = ControlPlane::builder(cfg).with_notifiers(notifiers).build();

    let token = CancellationToken::new();
    tokio::spawn(switchboard::shutdown::cancel_on_signal(token.clone()));

    let (served, ()) = tokio::join!(
        switchboard::server::serve(listener, plane.clone(), token.clone()),
        plane.run(token.clone()),
    );
    served.context("listener failed")?;
    info!("bye");
    Ok(())
}
