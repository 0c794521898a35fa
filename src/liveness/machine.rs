//! # Per-node liveness state machine.
//!
//! ```text
//!              register / heartbeat / check response
//!   offline ───────────────────────────────────────► online ◄──┐
//!      ▲                                              │  ▲      │ execution_result
//!      │ sweep (unbound + silent > offline_timeout)   │  │      │ stop_result
//!      │ grace expiry (unbound, no fresher lastSeen)  │  │      │ process_status(0, 0)
//!      │                                  dispatch /  │  │      │
//!      │                     process_status(n > 0)    ▼  │      │
//!      └─────────────────────────────────────────── running ───┘
//!      └─────────────────────────────────────────── crashed  (process_status(0, n > 0))
//! ```
//!
//! ## Rules
//! - Every transition for one node runs under that node's lock; unrelated nodes never contend.
//! - Bindings made by sessions and dispatch hand-offs take the same lock.
//! - Heartbeats never demote `running`.
//! - Notifications (`NodeStatusChanged`) fire on edges only.
//! - The sweep and grace expiry never touch a node with a live binding.
//! - Store failures are logged and published as `StoreFailed`; nothing is rolled back.
//! - A node leaving for `offline` drops its active preset, whose aggregate status is then recomputed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::StatusAggregator;
use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{
    ExecutionId, ExecutionStatus, NewExecutionRecord, Node, NodeId, NodeStatus, PresetId,
};
use crate::protocol::{ExecutionOutcome, Outbound};
use crate::registry::{ConnectionRegistry, TransportRef};
use crate::store::{Store, StoreResult};
use crate::sync::KeyedLocks;

/// Summary of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Nodes forced offline.
    pub offline: Vec<NodeId>,
    /// Bound nodes sent a connection check.
    pub checked: usize,
}

/// Liveness state machine.
pub struct Liveness {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    aggregator: Arc<StatusAggregator>,
    bus: Bus,
    offline_timeout: chrono::Duration,
    locks: KeyedLocks<NodeId>,
    sweeping: Mutex<()>,
}

impl Liveness {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn Store>,
        registry: Arc<ConnectionRegistry>,
        aggregator: Arc<StatusAggregator>,
        bus: Bus,
    ) -> Self {
        Self {
            store,
            registry,
            aggregator,
            bus,
            offline_timeout: cfg.offline_timeout_chrono(),
            locks: KeyedLocks::new(),
            sweeping: Mutex::new(()),
        }
    }

    /// Heartbeat over a transport or the HTTP fallback.
    pub async fn record_heartbeat(&self, node: NodeId) -> StoreResult<()> {
        self.seen_alive(node, "heartbeat").await
    }

    pub async fn on_connection_check_response(&self, node: NodeId) -> StoreResult<()> {
        self.seen_alive(node, "connection_check").await
    }

    /// Process report: `running > 0` → running, else `crashed > 0` → crashed, else online.
    pub async fn on_process_status(&self, node: NodeId, running: u32, crashed: u32) -> StoreResult<()> {
        let to = if running > 0 {
            NodeStatus::Running
        } else if crashed > 0 {
            NodeStatus::Crashed
        } else {
            NodeStatus::Online
        };

        let affected = {
            let _g = self.locks.lock(&node).await;
            self.touch(node).await?;
            let current = self.load(node).await?;
            let changed = self.transition(node, to, "process_status").await?;
            current.active_preset.filter(|_| changed)
        };
        self.refresh(affected).await;
        Ok(())
    }

    /// Execution result: narrows the open record, clears the active preset, node → online.
    ///
    /// Without an explicit id the newest `executing` record for
    /// `(node, active preset)` is narrowed.
    pub async fn on_execution_result(
        &self,
        node: NodeId,
        execution: Option<ExecutionId>,
        outcome: ExecutionOutcome,
    ) -> StoreResult<()> {
        let active = {
            let _g = self.locks.lock(&node).await;
            self.touch(node).await?;
            let current = self.load(node).await?;
            let active = current.active_preset;

            self.narrow(node, execution, active, outcome.into()).await;
            self.clear_active(node, active).await?;
            self.transition(node, NodeStatus::Online, "execution_result")
                .await?;
            active
        };
        self.refresh(active).await;
        Ok(())
    }

    /// Stop result: clears the active preset, node → online.
    pub async fn on_stop_result(&self, node: NodeId) -> StoreResult<()> {
        let active = {
            let _g = self.locks.lock(&node).await;
            self.touch(node).await?;
            let current = self.load(node).await?;
            self.clear_active(node, current.active_preset).await?;
            self.transition(node, NodeStatus::Online, "stop_result")
                .await?;
            current.active_preset
        };
        self.refresh(active).await;
        Ok(())
    }

    /// Binds `transport` to `node` under the node lock, then records the contact like a
    /// heartbeat. A sweep or grace expiry in progress for the node finishes first.
    pub(crate) async fn attach(
        &self,
        node: NodeId,
        transport: TransportRef,
        reason: &'static str,
    ) -> StoreResult<()> {
        let _g = self.locks.lock(&node).await;
        self.registry.bind(node, transport);
        self.seen_alive_locked(node, reason).await
    }

    /// Hands `command` for `preset` to the node's transport.
    ///
    /// Under the node lock the node is marked running with `preset` active and an
    /// `executing` record is appended, then the frame is queued. A result racing the
    /// send therefore finds both. A refused send restores the previous status and
    /// active preset and narrows the record to `failed_offline`.
    ///
    /// Returns true if the frame was queued. Store failures are reported, never fatal.
    pub(crate) async fn hand_off(&self, node: NodeId, preset: PresetId, command: String) -> bool {
        let _g = self.locks.lock(&node).await;
        let before = self
            .store
            .get_node(node)
            .await
            .inspect_err(|e| self.store_failed("get_node", Some(node), e))
            .ok()
            .flatten();

        if let Err(e) = self.store.set_active_operation(node, Some(preset)).await {
            self.store_failed("set_active_operation", Some(node), &e);
        }
        // Failures are reported inside `transition`.
        let _ = self.transition(node, NodeStatus::Running, "dispatch").await;
        let record = self
            .store
            .append_execution_record(NewExecutionRecord {
                preset,
                node,
                status: ExecutionStatus::Executing,
                executed_at: Utc::now(),
            })
            .await
            .inspect_err(|e| self.store_failed("append_execution_record", Some(node), e))
            .ok();

        let frame = Outbound::ExecuteCommand {
            command,
            preset_id: preset,
        };
        if self.registry.send_if_connected(node, frame) {
            return true;
        }

        if let Some(rec) = record {
            if let Err(e) = self
                .store
                .complete_execution(rec.id, node, ExecutionStatus::FailedOffline)
                .await
            {
                self.store_failed("complete_execution", Some(node), &e);
            }
        }
        if let Some(before) = before {
            if let Err(e) = self
                .store
                .set_active_operation(node, before.active_preset)
                .await
            {
                self.store_failed("set_active_operation", Some(node), &e);
            }
            let _ = self.transition(node, before.status, "dispatch_refused").await;
        }
        false
    }

    /// A stop command was handed to the node: node → online, active preset cleared.
    pub(crate) async fn on_stopped(&self, node: NodeId) -> StoreResult<()> {
        let _g = self.locks.lock(&node).await;
        self.store.set_active_operation(node, None).await?;
        self.transition(node, NodeStatus::Online, "stop").await?;
        Ok(())
    }

    /// Grace expiry: forces the node offline unless it is bound again or a
    /// heartbeat newer than `unbound_at` arrived over the HTTP fallback.
    ///
    /// Returns true if the node went offline.
    pub async fn mark_unreachable(&self, node: NodeId, unbound_at: DateTime<Utc>) -> StoreResult<bool> {
        let affected = {
            let _g = self.locks.lock(&node).await;
            if self.registry.is_connected(node) {
                debug!(%node, "grace expiry ignored, node bound again");
                return Ok(false);
            }
            let Some(current) = self.store.get_node(node).await? else {
                return Ok(false);
            };
            if current.last_seen.is_some_and(|seen| seen > unbound_at) {
                debug!(%node, "grace expiry ignored, fresher heartbeat");
                return Ok(false);
            }
            if !current.status.is_live() {
                return Ok(false);
            }
            self.go_offline(&current, "grace_expired").await?
        };
        self.refresh(affected).await;
        Ok(true)
    }

    /// One sweep pass.
    ///
    /// Returns `None` if another sweep is still running (the tick is skipped).
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        let Ok(_running) = self.sweeping.try_lock() else {
            warn!("sweep skipped, previous still running");
            self.bus.publish(Event::new(EventKind::SweepSkipped));
            return None;
        };

        let now = Utc::now();
        let mut report = SweepReport::default();

        for node in self.registry.connected_ids() {
            if self
                .registry
                .send_if_connected(node, Outbound::ConnectionCheck { at: now })
            {
                report.checked += 1;
            }
        }

        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.store_failed("list_nodes", None, &e);
                return Some(report);
            }
        };

        let mut affected: Vec<PresetId> = Vec::new();
        for candidate in nodes {
            if !self.is_stale(&candidate, now) {
                continue;
            }
            let _g = self.locks.lock(&candidate.id).await;
            let current = match self.store.get_node(candidate.id).await {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(e) => {
                    self.store_failed("get_node", Some(candidate.id), &e);
                    continue;
                }
            };
            // Bindings are made under the node lock, so this check holds for the write below.
            if !self.is_stale(&current, now) {
                continue;
            }
            match self.go_offline(&current, "sweep").await {
                Ok(preset) => {
                    report.offline.push(current.id);
                    affected.extend(preset);
                }
                Err(e) => self.store_failed("sweep", Some(current.id), &e),
            }
        }

        affected.sort_unstable();
        affected.dedup();
        for preset in affected {
            self.refresh(Some(preset)).await;
        }

        self.locks.prune();
        if !report.offline.is_empty() {
            info!(count = report.offline.len(), "sweep forced nodes offline");
        }
        self.bus
            .publish(Event::new(EventKind::SweepCompleted).with_count(report.offline.len()));
        Some(report)
    }

    // ---------------------------
    // Helpers (caller holds the node lock)
    // ---------------------------

    fn is_stale(&self, node: &Node, now: DateTime<Utc>) -> bool {
        if !node.status.is_live() || self.registry.is_connected(node.id) {
            return false;
        }
        match node.last_seen {
            Some(seen) => now - seen > self.offline_timeout,
            None => true,
        }
    }

    async fn seen_alive(&self, node: NodeId, reason: &'static str) -> StoreResult<()> {
        let _g = self.locks.lock(&node).await;
        self.seen_alive_locked(node, reason).await
    }

    async fn seen_alive_locked(&self, node: NodeId, reason: &'static str) -> StoreResult<()> {
        self.touch(node).await?;
        let current = self.load(node).await?;
        if current.status != NodeStatus::Running {
            self.transition(node, NodeStatus::Online, reason).await?;
        }
        Ok(())
    }

    async fn go_offline(&self, node: &Node, reason: &'static str) -> StoreResult<Option<PresetId>> {
        self.clear_active(node.id, node.active_preset).await?;
        self.transition(node.id, NodeStatus::Offline, reason).await?;
        Ok(node.active_preset)
    }

    async fn load(&self, node: NodeId) -> StoreResult<Node> {
        self.store
            .get_node(node)
            .await?
            .ok_or_else(|| StoreError::not_found("node", node))
    }

    async fn touch(&self, node: NodeId) -> StoreResult<()> {
        self.store.touch_node(node, Utc::now()).await.inspect_err(|e| {
            self.store_failed("touch_node", Some(node), e);
        })
    }

    async fn clear_active(&self, node: NodeId, active: Option<PresetId>) -> StoreResult<()> {
        if active.is_none() {
            return Ok(());
        }
        self.store
            .set_active_operation(node, None)
            .await
            .inspect_err(|e| self.store_failed("set_active_operation", Some(node), e))
    }

    /// Writes `to`; publishes `NodeStatusChanged` if it differs from the stored status.
    async fn transition(&self, node: NodeId, to: NodeStatus, reason: &'static str) -> StoreResult<bool> {
        let previous = self
            .store
            .update_node_status(node, to)
            .await
            .inspect_err(|e| self.store_failed("update_node_status", Some(node), e))?;
        if previous == to {
            return Ok(false);
        }
        info!(%node, from = %previous, to = %to, reason, "node status changed");
        self.bus.publish(
            Event::new(EventKind::NodeStatusChanged)
                .with_node(node)
                .with_transition(previous, to)
                .with_reason(reason),
        );
        Ok(true)
    }

    async fn narrow(
        &self,
        node: NodeId,
        execution: Option<ExecutionId>,
        active: Option<PresetId>,
        status: ExecutionStatus,
    ) {
        let target = match (execution, active) {
            (Some(id), _) => Some(id),
            (None, Some(preset)) => match self.store.find_open_execution(node, preset).await {
                Ok(rec) => rec.map(|r| r.id),
                Err(e) => {
                    self.store_failed("find_open_execution", Some(node), &e);
                    None
                }
            },
            (None, None) => None,
        };
        let Some(id) = target else {
            debug!(%node, "execution result without an open record");
            return;
        };
        match self.store.complete_execution(id, node, status).await {
            Ok(Some(_)) => debug!(%node, execution = %id, status = status.as_str(), "execution narrowed"),
            Ok(None) => debug!(%node, execution = %id, "execution already terminal"),
            Err(StoreError::NotFound { .. }) => {
                warn!(%node, execution = %id, "execution result for a record this node does not own")
            }
            Err(e) => self.store_failed("complete_execution", Some(node), &e),
        }
    }

    async fn refresh(&self, preset: Option<PresetId>) {
        let Some(preset) = preset else { return };
        if let Err(e) = self.aggregator.refresh(preset).await {
            warn!(%preset, err = %e, "failed to recompute preset status");
        }
    }

    fn store_failed(&self, op: &'static str, node: Option<NodeId>, err: &StoreError) {
        warn!(op, node = ?node, err = %err, "store write failed");
        let mut ev = Event::store_failed(op, err);
        ev.node = node;
        self.bus.publish(ev);
    }
}
