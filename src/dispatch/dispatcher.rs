//! # Command dispatcher.
//!
//! ## Dispatch flow
//! ```text
//! dispatch(preset)
//!   ├─► Store::load_operation(preset)           NotFound → surfaced
//!   ├─► Store::load_group_members(group)        NotFound → surfaced
//!   ├─► for each member (never aborts):
//!   │     ├─ no command      → warning "no command configured", no record
//!   │     ├─ not bound       → warning, `failed_offline` record
//!   │     └─ bound           → Liveness::hand_off under the node lock:
//!   │                            node running + `executing` record, then send
//!   │                            └─ refused → rolled back, warning, `failed_offline` record
//!   ├─► StatusAggregator::refresh(preset)       OperationStatusChanged
//!   └─► Bus: DispatchCompleted(result)
//! ```
//!
//! ## Rules
//! - Zero reachable targets is a successful dispatch.
//! - No retries; a per-leg store failure is logged and the loop continues.
//! - `online` counts members bound at dispatch time; `executed` counts commands handed off.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::aggregate::StatusAggregator;
use super::resolve::{resolve_command, CommandKey};
use crate::error::{Result, StoreError};
use crate::events::{Bus, Event};
use crate::liveness::Liveness;
use crate::model::{ExecutionStatus, NewExecutionRecord, NodeId, PresetId};
use crate::protocol::Outbound;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

/// Outcome of one dispatch leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegOutcome {
    /// Command handed to the transport.
    Executing,
    /// No live transport; recorded as `failed_offline`.
    FailedOffline,
    /// No command for this node; skipped.
    NoCommand,
}

/// One member's part of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchLeg {
    pub node: NodeId,
    pub name: String,
    pub outcome: LegOutcome,
    pub matched: Option<CommandKey>,
}

/// Summary of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub preset: PresetId,
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub executed: usize,
    pub warnings: Vec<String>,
    pub legs: Vec<DispatchLeg>,
}

/// Summary of a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopResult {
    pub preset: PresetId,
    pub total: usize,
    /// Bound members that received the stop command.
    pub stopped: usize,
    /// Members without a live transport (not an error).
    pub offline: usize,
}

/// Sends preset commands to the reachable members of the preset's group.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    liveness: Arc<Liveness>,
    aggregator: Arc<StatusAggregator>,
    bus: Bus,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ConnectionRegistry>,
        liveness: Arc<Liveness>,
        aggregator: Arc<StatusAggregator>,
        bus: Bus,
    ) -> Self {
        Self {
            store,
            registry,
            liveness,
            aggregator,
            bus,
        }
    }

    /// Dispatches `preset` to every member of its group.
    pub async fn dispatch(&self, preset: PresetId) -> Result<DispatchResult> {
        let p = self.store.load_operation(preset).await?;
        let members = self.store.load_group_members(p.group).await?;

        let mut result = DispatchResult {
            preset: p.id,
            total: members.len(),
            online: 0,
            offline: 0,
            executed: 0,
            warnings: Vec::new(),
            legs: Vec::with_capacity(members.len()),
        };

        for node in &members {
            let bound = self.registry.is_connected(node.id);
            if bound {
                result.online += 1;
            } else {
                result.offline += 1;
            }

            let Some(resolved) = resolve_command(&p.commands, node) else {
                warn!(node = %node.id, name = %node.name, preset = %p.id, "no command configured");
                result
                    .warnings
                    .push(format!("{}: no command configured", node.name));
                result.legs.push(DispatchLeg {
                    node: node.id,
                    name: node.name.clone(),
                    outcome: LegOutcome::NoCommand,
                    matched: None,
                });
                continue;
            };

            let sent = bound
                && self
                    .liveness
                    .hand_off(node.id, p.id, resolved.command.to_string())
                    .await;

            let outcome = if sent {
                result.executed += 1;
                LegOutcome::Executing
            } else {
                warn!(node = %node.id, name = %node.name, preset = %p.id, "node unreachable, skipped");
                result
                    .warnings
                    .push(format!("{}: not connected", node.name));
                LegOutcome::FailedOffline
            };

            // A refused hand-off already narrowed its own record.
            if !bound {
                if let Err(e) = self
                    .store
                    .append_execution_record(NewExecutionRecord {
                        preset: p.id,
                        node: node.id,
                        status: ExecutionStatus::FailedOffline,
                        executed_at: Utc::now(),
                    })
                    .await
                {
                    self.leg_store_failed("append_execution_record", node.id, p.id, &e);
                }
            }

            result.legs.push(DispatchLeg {
                node: node.id,
                name: node.name.clone(),
                outcome,
                matched: Some(resolved.key),
            });
        }

        if let Err(e) = self.aggregator.refresh(p.id).await {
            warn!(preset = %p.id, err = %e, "failed to recompute preset status");
        }

        info!(
            preset = %p.id,
            total = result.total,
            online = result.online,
            offline = result.offline,
            executed = result.executed,
            warnings = result.warnings.len(),
            "dispatch completed"
        );
        self.bus.publish(Event::dispatch_completed(result.clone()));
        Ok(result)
    }

    /// Sends a stop command to every bound member; they return to `online`.
    pub async fn stop(&self, preset: PresetId) -> Result<StopResult> {
        let p = self.store.load_operation(preset).await?;
        let members = self.store.load_group_members(p.group).await?;

        let mut result = StopResult {
            preset: p.id,
            total: members.len(),
            stopped: 0,
            offline: 0,
        };

        for node in &members {
            if !self
                .registry
                .send_if_connected(node.id, Outbound::StopCommand { preset_id: p.id })
            {
                result.offline += 1;
                continue;
            }
            result.stopped += 1;
            if let Err(e) = self.liveness.on_stopped(node.id).await {
                self.leg_store_failed("mark_stopped", node.id, p.id, &e);
            }
        }

        if let Err(e) = self.aggregator.refresh(p.id).await {
            warn!(preset = %p.id, err = %e, "failed to recompute preset status");
        }
        info!(preset = %p.id, stopped = result.stopped, offline = result.offline, "stop completed");
        self.bus.publish(Event::stop_completed(&result));
        Ok(result)
    }

    fn leg_store_failed(&self, op: &'static str, node: NodeId, preset: PresetId, err: &StoreError) {
        warn!(op, %node, %preset, err = %err, "store write failed during dispatch");
        self.bus.publish(
            Event::store_failed(op, err)
                .with_node(node)
                .with_preset(preset),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventKind;
    use crate::model::{CommandMap, NewNode, NodeStatus};
    use crate::registry::ChannelTransport;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        liveness: Arc<Liveness>,
        dispatcher: Dispatcher,
        bus: Bus,
    }

    fn fixture() -> Fixture {
        let cfg = Config::default();
        let bus = Bus::new(256);
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new(cfg.reconnect_grace, bus.clone()));
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
            aggregator,
            bus.clone(),
        );
        Fixture {
            store,
            registry,
            liveness,
            dispatcher,
            bus,
        }
    }

    impl Fixture {
        async fn member(&self, group: crate::model::GroupId, name: &str, n: u8) -> NodeId {
            let node = self
                .store
                .create_node(NewNode::declared(name, format!("10.2.0.{n}")))
                .await
                .unwrap();
            self.store.add_member(group, node.id).await.unwrap();
            node.id
        }

        fn connect(&self, node: NodeId) -> mpsc::Receiver<Outbound> {
            let (t, rx) = ChannelTransport::new(8);
            self.registry.bind(node, t);
            rx
        }
    }

    #[tokio::test]
    async fn test_unknown_preset_is_not_found() {
        let f = fixture();
        let err = f.dispatcher.dispatch(PresetId(404)).await.unwrap_err();
        assert_eq!(err.as_label(), "not_found");
    }

    #[tokio::test]
    async fn test_empty_group_dispatch_succeeds() {
        let f = fixture();
        let g = f.store.create_group("empty").await.unwrap();
        let p = f
            .store
            .create_preset("show", g.id, CommandMap::new())
            .await
            .unwrap();

        let mut rx = f.bus.subscribe();
        let r = f.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!((r.total, r.executed, r.online, r.offline), (0, 0, 0, 0));
        assert!(r.warnings.is_empty());

        let mut completed = false;
        while let Ok(ev) = rx.try_recv() {
            completed |= ev.kind == EventKind::DispatchCompleted;
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn test_bound_leg_runs_and_unbound_leg_is_recorded_failed_offline() {
        let f = fixture();
        let g = f.store.create_group("g").await.unwrap();
        let a = f.member(g.id, "a", 1).await;
        let b = f.member(g.id, "b", 2).await;
        let mut rx_a = f.connect(a);

        let commands: CommandMap = [("a", "render a"), ("b", "render b")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let p = f.store.create_preset("show", g.id, commands).await.unwrap();

        let r = f.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!((r.total, r.online, r.offline, r.executed), (2, 1, 1, 1));
        assert_eq!(r.warnings, vec!["b: not connected".to_string()]);

        assert_eq!(
            rx_a.try_recv().ok(),
            Some(Outbound::ExecuteCommand {
                command: "render a".into(),
                preset_id: p.id
            })
        );
        let node_a = f.store.get_node(a).await.unwrap().unwrap();
        assert_eq!(node_a.status, NodeStatus::Running);
        assert_eq!(node_a.active_preset, Some(p.id));

        let recs = f.store.list_executions(p.id).await.unwrap();
        let status_of = |n: NodeId| recs.iter().find(|r| r.node == n).map(|r| r.status);
        assert_eq!(status_of(a), Some(ExecutionStatus::Executing));
        assert_eq!(status_of(b), Some(ExecutionStatus::FailedOffline));

        assert!(f.store.load_operation(p.id).await.unwrap().is_running);
    }

    #[tokio::test]
    async fn test_immediate_result_after_dispatch_returns_node_online() {
        let f = fixture();
        let g = f.store.create_group("g").await.unwrap();
        let a = f.member(g.id, "a", 1).await;
        let mut rx_a = f.connect(a);
        let commands: CommandMap = [("a".to_string(), "render".to_string())].into();
        let p = f.store.create_preset("show", g.id, commands).await.unwrap();

        f.dispatcher.dispatch(p.id).await.unwrap();
        assert!(rx_a.try_recv().is_ok());
        f.liveness
            .on_execution_result(a, None, crate::protocol::ExecutionOutcome::Completed)
            .await
            .unwrap();

        let node_a = f.store.get_node(a).await.unwrap().unwrap();
        assert_eq!(node_a.status, NodeStatus::Online);
        assert_eq!(node_a.active_preset, None);
        let recs = f.store.list_executions(p.id).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_only_touches_bound_members() {
        let f = fixture();
        let g = f.store.create_group("g").await.unwrap();
        let a = f.member(g.id, "a", 1).await;
        f.member(g.id, "b", 2).await;
        let mut rx_a = f.connect(a);

        let commands: CommandMap = [("a".to_string(), "render".to_string())].into();
        let p = f.store.create_preset("show", g.id, commands).await.unwrap();
        f.dispatcher.dispatch(p.id).await.unwrap();
        let _ = rx_a.try_recv();

        let r = f.dispatcher.stop(p.id).await.unwrap();
        assert_eq!((r.total, r.stopped, r.offline), (2, 1, 1));
        assert_eq!(
            rx_a.try_recv().ok(),
            Some(Outbound::StopCommand { preset_id: p.id })
        );

        let node_a = f.store.get_node(a).await.unwrap().unwrap();
        assert_eq!(node_a.status, NodeStatus::Online);
        assert_eq!(node_a.active_preset, None);
        assert!(!f.store.load_operation(p.id).await.unwrap().is_running);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_abort_dispatch() {
        let f = fixture();
        let g = f.store.create_group("g").await.unwrap();
        let a = f.member(g.id, "a", 1).await;
        let b = f.member(g.id, "b", 2).await;
        let mut rx_a = f.connect(a);
        let mut rx_b = f.connect(b);
        let commands: CommandMap = [
            ("a".to_string(), "x".to_string()),
            ("b".to_string(), "y".to_string()),
        ]
        .into();
        let p = f.store.create_preset("show", g.id, commands).await.unwrap();

        f.store.set_unavailable(true);
        let r = f.dispatcher.dispatch(p.id).await.unwrap();
        assert_eq!(r.executed, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
