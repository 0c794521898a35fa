//! In-process fleet: a plane on a loopback listener, three simulated nodes, one preset.
//!
//! ```sh
//! RUST_LOG=info cargo run --example fleet
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use switchboard::model::CommandMap;
use switchboard::{Config, ControlPlane, LogNotifier, MemoryStore, Notify, Outbound, Store};

/// A node that registers, then reports every command as completed after a short run.
async fn simulated_node(
    name: &'static str,
    claimed: &'static str,
    addr: std::net::SocketAddr,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed
        .send(format!(
            r#"{{"type":"register","name":"{name}","address":"{claimed}"}}"#
        ))
        .await?;

    while let Some(line) = framed.next().await {
        let frame: Outbound = serde_json::from_str(&line?)?;
        match frame {
            Outbound::ExecuteCommand { command, .. } => {
                println!("[{name}] executing `{command}`");
                framed
                    .send(r#"{"type":"process_status","running":1}"#.to_string())
                    .await?;
                tokio::time::sleep(Duration::from_millis(300)).await;
                framed
                    .send(r#"{"type":"execution_result","status":"completed"}"#.to_string())
                    .await?;
            }
            Outbound::ConnectionCheck { .. } => {
                framed
                    .send(r#"{"type":"connection_check_response"}"#.to_string())
                    .await?;
            }
            other => println!("[{name}] {}", other.as_label()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let store = Arc::new(MemoryStore::new());
    let plane = ControlPlane::builder(Config::default())
        .with_store(store.clone())
        .with_notifiers(vec![Arc::new(LogNotifier::new()) as Arc<dyn Notify>])
        .build();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let token = CancellationToken::new();
    let server = tokio::spawn(switchboard::server::serve(listener, plane.clone(), token.clone()));
    let runner = tokio::spawn({
        let plane = plane.clone();
        let token = token.clone();
        async move { plane.run(token).await }
    });

    let fleet = [
        ("wall-left", "10.0.0.1"),
        ("wall-centre", "10.0.0.2"),
        ("wall-right", "10.0.0.3"),
    ];
    for (name, claimed) in fleet {
        tokio::spawn(async move {
            if let Err(e) = simulated_node(name, claimed, addr).await {
                eprintln!("[{name}] {e}");
            }
        });
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Nodes claim distinct addresses; over loopback they would all resolve to 127.0.0.1.
    let group = store.create_group("lobby").await?;
    for node in store.list_nodes().await? {
        store.add_member(group.id, node.id).await?;
    }
    let commands: CommandMap = store
        .list_nodes()
        .await?
        .into_iter()
        .map(|n| (n.name, "play intro.mp4".to_string()))
        .collect();
    let preset = store.create_preset("intro", group.id, commands).await?;

    let result = plane.dispatch(preset.id).await?;
    println!(
        "dispatch: total={} online={} executed={} warnings={:?}",
        result.total, result.online, result.executed, result.warnings
    );
    println!("status now: {}", plane.preset_status(preset.id).await?.state);

    tokio::time::sleep(Duration::from_millis(600)).await;
    println!("status later: {}", plane.preset_status(preset.id).await?.state);

    token.cancel();
    server.await??;
    runner.await?;
    Ok(())
}
