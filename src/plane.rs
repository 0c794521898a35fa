//! # ControlPlane: wires the registry, liveness, dispatcher and notifiers together.
//!
//! The [`ControlPlane`] owns the event bus, the injectable [`ConnectionRegistry`], the
//! liveness machine and the dispatcher. It is built once by [`ControlPlaneBuilder`] and
//! driven by [`ControlPlane::run`] until its cancellation token fires.
//!
//! ## High-level architecture
//! ```text
//! ControlPlaneBuilder::new(cfg)
//!     .with_store(store)          (default: MemoryStore)
//!     .with_notifiers(vec![..])
//!     .build()  ──► Arc<ControlPlane>
//!
//! run(token):
//!   ├─► notifier listener:  Bus.subscribe() ─► NotifierSet::emit(event)
//!   ├─► run_sweeper:        every sweep_interval ─► Liveness::sweep_once
//!   └─► run_grace_reaper:   earliest grace deadline ─► Liveness::mark_unreachable
//!   token cancelled ─► all three stop ─► NotifierSet::shutdown (drain queues)
//!
//! Per transport (one task each):
//!   open_session(transport, peer) ─► Session::handle(Inbound) ... ─► Session::finish()
//!
//! Operator calls:
//!   dispatch / stop / preset_status / http_heartbeat / create_node / rename_node /
//!   delete_node / connected_nodes / check_connection
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchResult, Dispatcher, StatusAggregator, StopResult};
use crate::error::{Error, Result};
use crate::events::Bus;
use crate::identity::{normalize_address, IdentityResolver};
use crate::liveness::{run_grace_reaper, run_sweeper, Liveness, SweepReport};
use crate::model::{NameChange, NewNode, Node, NodeId, PresetId, PresetStatus};
use crate::notify::{Notify, NotifierSet};
use crate::protocol::{HttpHeartbeat, Outbound};
use crate::registry::{ConnectionInfo, ConnectionRegistry, TransportRef};
use crate::session::Session;
use crate::store::{MemoryStore, Store};

/// Builder for [`ControlPlane`].
pub struct ControlPlaneBuilder {
    cfg: Config,
    store: Option<Arc<dyn Store>>,
    notifiers: Vec<Arc<dyn Notify>>,
}

impl ControlPlaneBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            store: None,
            notifiers: Vec::new(),
        }
    }

    /// Sets the record store. Defaults to an empty [`MemoryStore`].
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the notifiers fed by [`ControlPlane::run`].
    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn Notify>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    /// Builds the plane. Spawns nothing; background work starts in [`ControlPlane::run`].
    pub fn build(self) -> Arc<ControlPlane> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>);

        let registry = Arc::new(ConnectionRegistry::new(
            cfg.reconnect_grace_clamped(),
            bus.clone(),
        ));
        let aggregator = Arc::new(StatusAggregator::new(store.clone(), bus.clone()));
        let liveness = Arc::new(Liveness::new(
            &cfg,
            store.clone(),
            registry.clone(),
            aggregator.clone(),
            bus.clone(),
        ));
        let dispatcher = Dispatcher::new(
            store.clone(),
            registry.clone(),
            liveness.clone(),
            aggregator.clone(),
            bus.clone(),
        );
        let identity = IdentityResolver::new(store.clone(), bus.clone());

        Arc::new(ControlPlane {
            cfg,
            bus,
            store,
            registry,
            identity,
            liveness,
            aggregator,
            dispatcher,
            notifiers: Mutex::new(self.notifiers),
            started: Instant::now(),
        })
    }
}

/// Control plane for a fleet of rendering nodes.
pub struct ControlPlane {
    cfg: Config,
    bus: Bus,
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    identity: IdentityResolver,
    liveness: Arc<Liveness>,
    aggregator: Arc<StatusAggregator>,
    dispatcher: Dispatcher,
    notifiers: Mutex<Vec<Arc<dyn Notify>>>,
    started: Instant,
}

impl ControlPlane {
    pub fn builder(cfg: Config) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(cfg)
    }

    /// Runs the background tasks until `token` is cancelled.
    ///
    /// Notifiers are consumed by the first call; a second call runs without them.
    pub async fn run(&self, token: CancellationToken) {
        let notifiers = std::mem::take(&mut *self.notifiers.lock().await);
        let set = NotifierSet::new(notifiers, self.bus.clone());
        let mut rx = self.bus.subscribe();
        info!(
            notifiers = set.len(),
            sweep = ?self.cfg.sweep_interval_clamped(),
            grace = ?self.cfg.reconnect_grace_clamped(),
            "control plane running"
        );

        let listener = async {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "notifier listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        };
        let sweeper = run_sweeper(
            self.liveness.clone(),
            self.cfg.sweep_interval_clamped(),
            token.clone(),
        );
        let reaper = run_grace_reaper(self.liveness.clone(), self.registry.clone(), token.clone());

        tokio::join!(listener, sweeper, reaper);
        set.shutdown().await;
        info!("control plane stopped");
    }

    /// Starts handling a new transport. `peer` is the remote address as seen by the listener.
    pub fn open_session(self: &Arc<Self>, transport: TransportRef, peer: impl Into<String>) -> Session {
        Session::new(Arc::clone(self), transport, peer.into())
    }

    /// HTTP fallback heartbeat: same liveness effect as a transport heartbeat, never
    /// creates or closes a binding.
    pub async fn http_heartbeat(&self, hb: HttpHeartbeat) -> Result<NodeId> {
        let address = normalize_address(&hb.address);
        let node = match self.store.find_node_by_address(&address).await? {
            Some(n) => n,
            None => self
                .store
                .find_node_by_name(&hb.name)
                .await?
                .ok_or_else(|| Error::not_found("node", &address))?,
        };
        self.liveness.record_heartbeat(node.id).await?;
        Ok(node.id)
    }

    pub async fn dispatch(&self, preset: PresetId) -> Result<DispatchResult> {
        self.dispatcher.dispatch(preset).await
    }

    pub async fn stop(&self, preset: PresetId) -> Result<StopResult> {
        self.dispatcher.stop(preset).await
    }

    /// Current aggregate status of a preset (no notification).
    pub async fn preset_status(&self, preset: PresetId) -> Result<PresetStatus> {
        Ok(self.aggregator.status(preset).await?)
    }

    /// Operator-created node: offline, never seen.
    ///
    /// A node holding `name` at another address is deleted by the store; its
    /// connection is evicted and its active preset recomputed.
    pub async fn create_node(&self, name: &str, address: &str) -> Result<Node> {
        let replaced = self.store.find_node_by_name(name).await?;
        let node = self
            .store
            .create_node(NewNode::declared(name, normalize_address(address)))
            .await?;
        info!(node = %node.id, name = %node.name, address = %node.address, "node created");
        if let Some(old) = replaced.filter(|old| old.id != node.id) {
            self.forget(&old).await;
        }
        Ok(node)
    }

    /// Renames a node; the change is kept in the name history.
    pub async fn rename_node(&self, node: NodeId, name: &str) -> Result<Node> {
        let renamed = self.store.rename_node(node, name).await?;
        info!(%node, name = %renamed.name, "node renamed");
        Ok(renamed)
    }

    pub async fn name_history(&self, address: &str) -> Result<Vec<NameChange>> {
        Ok(self.store.name_history(&normalize_address(address)).await?)
    }

    /// Deletes a node and evicts its connection without arming a grace deadline.
    pub async fn delete_node(&self, node: NodeId) -> Result<Node> {
        let removed = self.store.delete_node(node).await?;
        info!(%node, name = %removed.name, "node deleted");
        self.forget(&removed).await;
        Ok(removed)
    }

    async fn forget(&self, removed: &Node) {
        self.registry.evict(removed.id);
        if let Some(preset) = removed.active_preset {
            if let Err(e) = self.aggregator.refresh(preset).await {
                warn!(%preset, err = %e, "failed to recompute preset status");
            }
        }
    }

    pub async fn node(&self, node: NodeId) -> Result<Node> {
        self.store
            .get_node(node)
            .await?
            .ok_or_else(|| Error::not_found("node", node))
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.store.list_nodes().await?)
    }

    pub fn connected_nodes(&self) -> Vec<ConnectionInfo> {
        self.registry.connected()
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.registry.is_connected(node)
    }

    /// Sends a `connection_check` to one node.
    pub fn check_connection(&self, node: NodeId) -> Result<()> {
        let frame = Outbound::ConnectionCheck { at: Utc::now() };
        if self.registry.send_if_connected(node, frame) {
            Ok(())
        } else {
            Err(Error::Unreachable { node })
        }
    }

    /// Runs one liveness sweep immediately.
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        self.liveness.sweep_once().await
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Time since the plane was built.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub(crate) fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub(crate) fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}
