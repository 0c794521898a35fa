//! # switchboard
//!
//! **Switchboard** is the control plane for a fleet of remote display-rendering nodes.
//!
//! Nodes hold a long-lived line-delimited JSON connection to the plane, register under
//! their network address, heartbeat and report what they are running. Operators group
//! nodes and start or stop *presets*: a per-node command map that is fanned out to the
//! group members that are reachable at that moment.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌────────────┐   ┌────────────┐   ┌────────────┐
//!     │  node #1   │   │  node #2   │   │  node #3   │
//!     └─────┬──────┘   └─────┬──────┘   └─────┬──────┘
//!           ▼ JSON lines     ▼                ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  server::serve ─► handle_connection ─► Session (per transport)│
//! └─────┬──────────────────────┬──────────────────────┬───────────┘
//!       ▼                      ▼                      ▼
//!  IdentityResolver     ConnectionRegistry         Liveness
//!  (address → node)     (node → transport,         (offline/online/
//!                        grace deadlines)           running/crashed)
//!       │                      ▲                      │
//!       │          Dispatcher ─┘ (execute / stop)     │
//!       │               │                             │
//!       ▼               ▼                             ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Store (records)                           │
//! └───────────────────────────────────────────────────────────────┘
//!                       │ every state edge
//!                       ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                Bus (broadcast channel of Event)               │
//! └─────────────────────────────┬─────────────────────────────────┘
//!                               ▼
//!                 NotifierSet (per-notifier queues)
//!                     ┌─────────┼─────────┐
//!                     ▼         ▼         ▼
//!                 LogNotifier  ui push   ...
//! ```
//!
//! ### Liveness
//! ```text
//!            register / heartbeat / check response
//!   offline ─────────────────────────────────────► online
//!      ▲  ▲                                         │   ▲
//!      │  │ grace expired / sweep timeout           │   │ execution / stop result,
//!      │  └───────────────────────── running ◄──────┘   │ process_status(0)
//!      │                                │ dispatch      │
//!      └──────── crashed ◄──────────────┘ crashed > 0 ──┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types                                   |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Plane**         | Builds and runs the background tasks, operator entry points. | [`ControlPlane`], [`ControlPlaneBuilder`]   |
//! | **Sessions**      | Per-connection frame handling and transport binding.         | [`Session`], [`Inbound`], [`Outbound`]      |
//! | **Dispatch**      | Command fan-out and derived preset status.                   | [`DispatchResult`], [`PresetStatus`]        |
//! | **Notifications** | Status edges pushed to pluggable sinks.                      | [`Notify`], [`LogNotifier`], [`Event`]      |
//! | **Records**       | Injectable record store.                                     | [`Store`], [`MemoryStore`]                  |
//! | **Configuration** | Timeouts, grace period, queue sizes.                         | [`Config`]                                  |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use switchboard::{ChannelTransport, Config, ControlPlane, Inbound, MemoryStore, Outbound};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let plane = ControlPlane::builder(Config::default())
//!         .with_store(store.clone())
//!         .build();
//!
//!     // A node connects and registers.
//!     let (transport, mut frames) = ChannelTransport::new(16);
//!     let mut session = plane.open_session(transport, "10.0.0.7");
//!     session
//!         .handle(Inbound::Register { name: "wall-left".into(), address: None })
//!         .await?;
//!     let node = session.node().ok_or("not registered")?;
//!
//!     // One group, one preset addressing the member by name.
//!     let group = store.create_group("lobby").await?;
//!     store.add_member(group.id, node).await?;
//!     let commands = [("wall-left".to_string(), "play intro.mp4".to_string())].into();
//!     let preset = store.create_preset("intro", group.id, commands).await?;
//!
//!     let result = plane.dispatch(preset.id).await?;
//!     assert_eq!(result.executed, 1);
//!
//!     // registration_ack, then the command itself.
//!     assert!(matches!(frames.recv().await, Some(Outbound::RegistrationAck { .. })));
//!     assert!(matches!(frames.recv().await, Some(Outbound::ExecuteCommand { .. })));
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod identity;
pub mod liveness;
pub mod model;
pub mod notify;
pub mod plane;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod store;
mod sync;

// ---- Public re-exports ----

pub use config::Config;
pub use dispatch::{DispatchResult, StopResult};
pub use error::{ConfigError, Error, Result, StoreError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use model::{
    AggregateState, ExecutionStatus, GroupId, Node, NodeId, NodeStatus, PresetId, PresetStatus,
};
pub use notify::{LogNotifier, Notify};
pub use plane::{ControlPlane, ControlPlaneBuilder};
pub use protocol::{HttpHeartbeat, Inbound, Outbound, ServerState};
pub use registry::{ChannelTransport, ConnectionRegistry, Transport};
pub use session::Session;
pub use store::{MemoryStore, Store};
