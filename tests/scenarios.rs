//! End-to-end behavior of the control plane through its public API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use switchboard::model::{CommandMap, NewNode};
use switchboard::{
    AggregateState, ChannelTransport, Config, ControlPlane, Event, EventKind, HttpHeartbeat,
    Inbound, MemoryStore, NodeId, NodeStatus, Notify, Outbound, Session, Store,
};

struct Harness {
    store: Arc<MemoryStore>,
    plane: Arc<ControlPlane>,
}

impl Harness {
    fn new(cfg: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let plane = ControlPlane::builder(cfg).with_store(store.clone()).build();
        Self { store, plane }
    }

    /// Opens a session from `addr` and registers it as `name`.
    async fn connect(&self, name: &str, addr: &str) -> (Session, NodeId, mpsc::Receiver<Outbound>) {
        let (t, mut rx) = ChannelTransport::new(32);
        let mut s = self.plane.open_session(t, addr);
        s.handle(Inbound::Register {
            name: name.to_string(),
            address: None,
        })
        .await
        .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::RegistrationAck { .. }
        ));
        let node = s.node().unwrap();
        (s, node, rx)
    }

    async fn status(&self, node: NodeId) -> NodeStatus {
        self.plane.node(node).await.unwrap().status
    }
}

fn commands(pairs: &[(&str, &str)]) -> CommandMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn status_edges(rx: &mut broadcast::Receiver<Event>, node: NodeId) -> Vec<NodeStatus> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::NodeStatusChanged && ev.node == Some(node) {
            out.extend(ev.status);
        }
    }
    out
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_partial_dispatch_never_aborts() {
    let h = Harness::new(Config::default());
    let group = h.store.create_group("atrium").await.unwrap();

    let mut bound = Vec::new();
    for i in 0..3 {
        let (s, node, rx) = h.connect(&format!("wall-{i}"), &format!("10.3.0.{i}")).await;
        h.store.add_member(group.id, node).await.unwrap();
        bound.push((s, rx));
    }
    for i in 3..5 {
        let n = h
            .plane
            .create_node(&format!("wall-{i}"), &format!("10.3.0.{i}"))
            .await
            .unwrap();
        h.store.add_member(group.id, n.id).await.unwrap();
    }
    let map = commands(&[
        ("wall-0", "play a"),
        ("wall-1", "play b"),
        ("wall-2", "play c"),
        ("wall-3", "play d"),
        ("wall-4", "play e"),
    ]);
    let preset = h.store.create_preset("loop", group.id, map).await.unwrap();

    let result = h.plane.dispatch(preset.id).await.unwrap();
    assert_eq!(result.total, 5);
    assert_eq!(result.executed, 3);
    assert_eq!(result.offline, 2);
    assert_eq!(result.warnings.len(), 2);

    for (_, rx) in &mut bound {
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::ExecuteCommand { .. }
        ));
    }

    let status = h.plane.preset_status(preset.id).await.unwrap();
    assert_eq!(status.state, AggregateState::Partial);
    assert_eq!(status.color, "yellow");
}

#[tokio::test]
async fn test_dispatch_skips_member_without_command() {
    let h = Harness::new(Config::default());
    let group = h.store.create_group("lobby").await.unwrap();

    let (_sa, a, mut rx_a) = h.connect("A", "10.4.0.1").await;
    let b = h.plane.create_node("B", "10.4.0.2").await.unwrap().id;
    let (_sc, c, mut rx_c) = h.connect("C", "10.4.0.3").await;
    for n in [a, b, c] {
        h.store.add_member(group.id, n).await.unwrap();
    }
    let preset = h
        .store
        .create_preset("show", group.id, commands(&[("A", "run a"), ("C", "run c")]))
        .await
        .unwrap();

    let result = h.plane.dispatch(preset.id).await.unwrap();
    assert_eq!(result.total, 3);
    assert_eq!(result.executed, 2);
    assert_eq!(result.warnings, vec!["B: no command configured".to_string()]);

    match rx_a.try_recv().unwrap() {
        Outbound::ExecuteCommand { command, preset_id } => {
            assert_eq!(command, "run a");
            assert_eq!(preset_id, preset.id);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        rx_c.try_recv().unwrap(),
        Outbound::ExecuteCommand { .. }
    ));
    assert_eq!(h.status(a).await, NodeStatus::Running);
    assert_eq!(h.status(b).await, NodeStatus::Offline);
}

#[tokio::test]
async fn test_dispatch_with_no_live_targets_succeeds() {
    let h = Harness::new(Config::default());
    let group = h.store.create_group("dark").await.unwrap();
    let n = h.plane.create_node("solo", "10.5.0.1").await.unwrap();
    h.store.add_member(group.id, n.id).await.unwrap();
    let preset = h
        .store
        .create_preset("idle", group.id, commands(&[("solo", "run")]))
        .await
        .unwrap();

    let result = h.plane.dispatch(preset.id).await.unwrap();
    assert_eq!(result.executed, 0);
    assert_eq!(result.offline, 1);

    let status = h.plane.preset_status(preset.id).await.unwrap();
    assert_eq!(status.state, AggregateState::Offline);
}

#[tokio::test]
async fn test_execution_result_returns_node_online() {
    let h = Harness::new(Config::default());
    let group = h.store.create_group("g").await.unwrap();
    let (mut s, node, _rx) = h.connect("wall", "10.6.0.1").await;
    h.store.add_member(group.id, node).await.unwrap();
    let preset = h
        .store
        .create_preset("p", group.id, commands(&[("wall", "run")]))
        .await
        .unwrap();

    h.plane.dispatch(preset.id).await.unwrap();
    assert_eq!(
        h.plane.preset_status(preset.id).await.unwrap().state,
        AggregateState::Running
    );

    s.handle(Inbound::ExecutionResult {
        execution_id: None,
        status: switchboard::protocol::ExecutionOutcome::Completed,
    })
    .await
    .unwrap();

    let n = h.plane.node(node).await.unwrap();
    assert_eq!(n.status, NodeStatus::Online);
    assert_eq!(n.active_preset, None);
    assert_eq!(
        h.plane.preset_status(preset.id).await.unwrap().state,
        AggregateState::Ready
    );
}

#[tokio::test]
async fn test_stale_disconnect_keeps_newer_binding() {
    let h = Harness::new(Config::default());
    let (first, node, _rx1) = h.connect("wall", "10.7.0.1").await;
    let (_second, again, _rx2) = h.connect("wall", "10.7.0.1").await;
    assert_eq!(node, again);

    first.finish();
    assert!(h.plane.is_connected(node));
    assert_eq!(h.plane.connected_nodes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_never_goes_offline() {
    let h = Harness::new(Config::default());
    let token = CancellationToken::new();
    let runner = tokio::spawn({
        let plane = h.plane.clone();
        let token = token.clone();
        async move { plane.run(token).await }
    });
    settle().await;
    let mut events = h.plane.bus().subscribe();

    let (s, node, _rx) = h.connect("wall", "10.8.0.1").await;
    tokio::time::advance(Duration::from_secs(1)).await;
    s.finish();

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    let (_s2, again, _rx2) = h.connect("wall", "10.8.0.1").await;
    assert_eq!(again, node);

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(h.status(node).await, NodeStatus::Online);
    assert!(!status_edges(&mut events, node).contains(&NodeStatus::Offline));

    token.cancel();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_grace_expiry_marks_node_offline_once() {
    let h = Harness::new(Config::default());
    let token = CancellationToken::new();
    let runner = tokio::spawn({
        let plane = h.plane.clone();
        let token = token.clone();
        async move { plane.run(token).await }
    });
    settle().await;

    let (s, node, _rx) = h.connect("wall", "10.9.0.1").await;
    let mut events = h.plane.bus().subscribe();
    s.finish();

    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;

    assert_eq!(h.status(node).await, NodeStatus::Offline);
    assert_eq!(status_edges(&mut events, node), vec![NodeStatus::Offline]);

    token.cancel();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_http_heartbeat_suppresses_grace_expiry() {
    let h = Harness::new(Config::default());
    let token = CancellationToken::new();
    let runner = tokio::spawn({
        let plane = h.plane.clone();
        let token = token.clone();
        async move { plane.run(token).await }
    });
    settle().await;

    let (s, node, _rx) = h.connect("wall", "10.10.0.1").await;
    s.finish();
    std::thread::sleep(Duration::from_millis(5));

    let hb = HttpHeartbeat {
        name: "wall".into(),
        address: "10.10.0.1".into(),
    };
    assert_eq!(h.plane.http_heartbeat(hb).await.unwrap(), node);
    assert!(!h.plane.is_connected(node));

    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(h.status(node).await, NodeStatus::Online);

    token.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_sweep_times_out_stale_unbound_node_with_one_notification() {
    let h = Harness::new(Config::default());
    let stale = h
        .store
        .create_node(NewNode {
            name: "stale".into(),
            address: "10.11.0.1".into(),
            status: NodeStatus::Online,
            last_seen: Some(Utc::now() - chrono::Duration::seconds(400)),
        })
        .await
        .unwrap();
    let fresh = h
        .store
        .create_node(NewNode::registered("fresh", "10.11.0.2", Utc::now()))
        .await
        .unwrap();
    let mut events = h.plane.bus().subscribe();

    let report = h.plane.sweep_now().await.unwrap();
    assert_eq!(report.offline, vec![stale.id]);
    assert_eq!(h.status(stale.id).await, NodeStatus::Offline);
    assert_eq!(h.status(fresh.id).await, NodeStatus::Online);

    let again = h.plane.sweep_now().await.unwrap();
    assert!(again.offline.is_empty());
    assert_eq!(status_edges(&mut events, stale.id), vec![NodeStatus::Offline]);
}

#[tokio::test]
async fn test_sweep_never_touches_bound_node() {
    let cfg = Config {
        offline_timeout: Duration::ZERO,
        ..Config::default()
    };
    let h = Harness::new(cfg);
    let (_s, bound, mut rx) = h.connect("bound", "10.12.0.1").await;
    let (gone, unbound, _rx2) = h.connect("gone", "10.12.0.2").await;
    gone.finish();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = h.plane.sweep_now().await.unwrap();
    assert_eq!(report.offline, vec![unbound]);
    assert_eq!(report.checked, 1);
    assert_eq!(h.status(bound).await, NodeStatus::Online);
    assert!(matches!(
        rx.try_recv().unwrap(),
        Outbound::ConnectionCheck { .. }
    ));
}

#[tokio::test]
async fn test_delete_evicts_without_grace() {
    let h = Harness::new(Config::default());
    let (_s, node, _rx) = h.connect("wall", "10.13.0.1").await;

    h.plane.delete_node(node).await.unwrap();
    assert!(!h.plane.is_connected(node));
    assert!(h.plane.node(node).await.is_err());
}

#[tokio::test]
async fn test_taking_a_name_evicts_the_node_that_held_it() {
    let h = Harness::new(Config::default());
    let (_s1, wall, _rx1) = h.connect("wall", "10.13.0.2").await;
    let (_s2, _lobby, _rx2) = h.connect("lobby", "10.13.0.3").await;

    // Re-registration from a new address under a taken name.
    let (_s3, moved, _rx3) = h.connect("wall", "10.13.0.4").await;
    assert_ne!(moved, wall);
    assert!(!h.plane.is_connected(wall));
    assert_eq!(h.plane.connected_nodes().len(), 2);

    // Operator declares a node under a taken name.
    let declared = h.plane.create_node("lobby", "10.13.0.5").await.unwrap();
    assert_eq!(h.plane.connected_nodes().len(), 1);
    assert_eq!(h.plane.connected_nodes()[0].node, moved);
    assert_eq!(h.plane.nodes().await.unwrap().len(), 2);
    assert!(!h.plane.is_connected(declared.id));
}

#[tokio::test]
async fn test_rename_records_history_and_rejects_collision() {
    let h = Harness::new(Config::default());
    let a = h.plane.create_node("left", "10.14.0.1").await.unwrap();
    h.plane.create_node("right", "10.14.0.2").await.unwrap();

    let renamed = h.plane.rename_node(a.id, "centre").await.unwrap();
    assert_eq!(renamed.name, "centre");
    let history = h.plane.name_history("10.14.0.1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous, "left");
    assert_eq!(history[0].current, "centre");

    let err = h.plane.rename_node(a.id, "right").await.unwrap_err();
    assert_eq!(err.as_label(), "conflict");
}

#[derive(Default)]
struct Recorder {
    edges: Mutex<Vec<(NodeId, NodeStatus)>>,
}

#[async_trait]
impl Notify for Recorder {
    async fn on_status_changed(&self, node: NodeId, status: NodeStatus) {
        self.edges.lock().unwrap().push((node, status));
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn test_notifiers_receive_status_edges() {
    let recorder = Arc::new(Recorder::default());
    let plane = ControlPlane::builder(Config::default())
        .with_notifiers(vec![recorder.clone() as Arc<dyn Notify>])
        .build();
    let token = CancellationToken::new();
    let runner = tokio::spawn({
        let plane = plane.clone();
        let token = token.clone();
        async move { plane.run(token).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let node = plane.create_node("wall", "10.15.0.1").await.unwrap().id;
    let (t, _rx) = ChannelTransport::new(8);
    let mut s = plane.open_session(t, "10.15.0.1");
    s.handle(Inbound::Heartbeat {
        address: None,
        timestamp: None,
    })
    .await
    .unwrap();
    s.handle(Inbound::ProcessStatus {
        running: 0,
        crashed: 1,
    })
    .await
    .unwrap();

    let expected = vec![(node, NodeStatus::Online), (node, NodeStatus::Crashed)];
    for _ in 0..100 {
        if *recorder.edges.lock().unwrap() == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*recorder.edges.lock().unwrap(), expected);

    token.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_check_connection_requires_binding() {
    let h = Harness::new(Config::default());
    let (_s, node, mut rx) = h.connect("wall", "10.16.0.1").await;
    h.plane.check_connection(node).unwrap();
    assert!(matches!(
        rx.try_recv().unwrap(),
        Outbound::ConnectionCheck { .. }
    ));

    let idle = h.plane.create_node("idle", "10.16.0.2").await.unwrap();
    let err = h.plane.check_connection(idle.id).unwrap_err();
    assert_eq!(err.as_label(), "unreachable");
}
