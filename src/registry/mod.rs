//! # Connection registry.
//!
//! Holds the single live transport per node identity and the pending grace
//! deadlines of identities whose transport dropped.
//!
//! ## Architecture
//! ```text
//! session task ── bind(node, t) ──────► bindings: DashMap<NodeId, Binding>
//!                                          │  (previous transport closed: "last registration wins")
//!                                          └─► grace.remove(node)
//!
//! session end ─── unbind(node, t) ──┬─► bindings.remove_if(bound == t)   (stale: no-op)
//!                                   └─► grace.insert(node, now + grace_period)
//!                                          │
//!                                          ▼
//!                               grace reaper (liveness) ─► take_expired(now)
//!                                                          └─► Liveness::mark_unreachable
//! ```
//!
//! ## Rules
//! - At most one binding per identity after any sequence of `bind`/`unbind`.
//! - `unbind` with a transport that is no longer bound is a no-op (no grace armed).
//! - Sends clone the handle out of the map first; no shard lock is held during I/O.
//! - The registry never touches the store; status effects belong to the liveness machine.

mod transport;

pub use transport::{ChannelTransport, Transport, TransportId, TransportRef};

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MAX_PERIOD;
use crate::events::{Bus, Event, EventKind};
use crate::model::NodeId;
use crate::protocol::Outbound;

struct Binding {
    transport: TransportRef,
    bound_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct GraceDeadline {
    deadline: Instant,
    unbound_at: DateTime<Utc>,
}

/// Snapshot of one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub node: NodeId,
    #[serde(skip)]
    pub transport: TransportId,
    pub bound_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Grace deadline that passed without a new binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredGrace {
    pub node: NodeId,
    /// Wall-clock time of the disconnect that armed the deadline.
    pub unbound_at: DateTime<Utc>,
}

/// Owned, injectable map of live bindings.
pub struct ConnectionRegistry {
    bindings: DashMap<NodeId, Binding>,
    grace: DashMap<NodeId, GraceDeadline>,
    grace_changed: Notify,
    grace_period: Duration,
    bus: Bus,
}

impl ConnectionRegistry {
    /// `grace_period` is clamped to [`MAX_PERIOD`].
    pub fn new(grace_period: Duration, bus: Bus) -> Self {
        Self {
            bindings: DashMap::new(),
            grace: DashMap::new(),
            grace_changed: Notify::new(),
            grace_period: grace_period.min(MAX_PERIOD),
            bus,
        }
    }

    /// Binds `transport` to `node`, closing any other transport bound to it and
    /// cancelling a pending grace deadline.
    ///
    /// Returns true if a different transport was evicted.
    pub fn bind(&self, node: NodeId, transport: TransportRef) -> bool {
        let now = Utc::now();
        let id = transport.id();
        let previous = self.bindings.insert(
            node,
            Binding {
                transport,
                bound_at: now,
                last_activity: now,
            },
        );
        if self.grace.remove(&node).is_some() {
            debug!(%node, "grace cancelled by rebind");
            self.grace_changed.notify_one();
        }

        let evicted = match previous {
            Some(prev) if prev.transport.id() != id => {
                prev.transport.close();
                info!(%node, old = %prev.transport.id(), new = %id, "previous transport evicted");
                self.bus.publish(
                    Event::new(EventKind::NodeEvicted)
                        .with_node(node)
                        .with_reason("superseded by newer registration"),
                );
                true
            }
            _ => false,
        };
        self.bus.publish(Event::new(EventKind::NodeBound).with_node(node));
        evicted
    }

    /// Removes the binding if `transport` is the one bound, and arms the grace deadline.
    ///
    /// Returns false (and does nothing) for a stale disconnect.
    pub fn unbind(&self, node: NodeId, transport: TransportId) -> bool {
        let removed = self
            .bindings
            .remove_if(&node, |_, b| b.transport.id() == transport);
        if removed.is_none() {
            debug!(%node, %transport, "stale disconnect ignored");
            return false;
        }

        self.grace.insert(
            node,
            GraceDeadline {
                deadline: Instant::now() + self.grace_period,
                unbound_at: Utc::now(),
            },
        );
        self.grace_changed.notify_one();
        info!(%node, grace = ?self.grace_period, "node unbound");
        self.bus.publish(Event::new(EventKind::NodeUnbound).with_node(node));
        true
    }

    /// Removes and closes the binding without arming a grace deadline.
    pub fn evict(&self, node: NodeId) -> bool {
        if self.grace.remove(&node).is_some() {
            self.grace_changed.notify_one();
        }
        match self.bindings.remove(&node) {
            Some((_, b)) => {
                b.transport.close();
                self.bus.publish(
                    Event::new(EventKind::NodeEvicted)
                        .with_node(node)
                        .with_reason("node deleted"),
                );
                true
            }
            None => false,
        }
    }

    /// Queues `frame` on the node's transport if one is bound. Never waits for delivery.
    pub fn send_if_connected(&self, node: NodeId, frame: Outbound) -> bool {
        let transport = match self.bindings.get(&node) {
            Some(b) => b.transport.clone(),
            None => return false,
        };
        let label = frame.as_label();
        match transport.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(%node, frame = label, err = %e, "send failed");
                false
            }
        }
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.bindings.contains_key(&node)
    }

    /// Id of the transport currently bound to `node`.
    pub fn bound_transport(&self, node: NodeId) -> Option<TransportId> {
        self.bindings.get(&node).map(|b| b.transport.id())
    }

    /// Records inbound activity on the binding, if `transport` is still the bound one.
    pub fn touch(&self, node: NodeId, transport: TransportId) {
        if let Some(mut b) = self.bindings.get_mut(&node) {
            if b.transport.id() == transport {
                b.last_activity = Utc::now();
            }
        }
    }

    /// Snapshot of all bindings, ordered by node id.
    pub fn connected(&self) -> Vec<ConnectionInfo> {
        let mut out: Vec<ConnectionInfo> = self
            .bindings
            .iter()
            .map(|e| ConnectionInfo {
                node: *e.key(),
                transport: e.transport.id(),
                bound_at: e.bound_at,
                last_activity_at: e.last_activity,
            })
            .collect();
        out.sort_unstable_by_key(|c| c.node);
        out
    }

    pub fn connected_ids(&self) -> Vec<NodeId> {
        self.bindings.iter().map(|e| *e.key()).collect()
    }

    pub fn is_grace_pending(&self, node: NodeId) -> bool {
        self.grace.contains_key(&node)
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Earliest pending grace deadline.
    pub fn next_grace_deadline(&self) -> Option<Instant> {
        self.grace.iter().map(|e| e.deadline).min()
    }

    /// Resolves when a grace deadline was added or removed.
    pub async fn grace_changed(&self) {
        self.grace_changed.notified().await;
    }

    /// Removes every deadline at or before `now`.
    ///
    /// Identities bound again in the meantime are dropped from the result.
    pub fn take_expired(&self, now: Instant) -> Vec<ExpiredGrace> {
        let due: Vec<NodeId> = self
            .grace
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();

        let mut out = Vec::with_capacity(due.len());
        for node in due {
            let Some((_, g)) = self.grace.remove_if(&node, |_, g| g.deadline <= now) else {
                continue;
            };
            if self.bindings.contains_key(&node) {
                continue;
            }
            self.bus.publish(Event::new(EventKind::GraceExpired).with_node(node));
            out.push(ExpiredGrace {
                node,
                unbound_at: g.unbound_at,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Duration::from_secs(5), Bus::new(64))
    }

    #[test]
    fn test_last_registration_wins_and_closes_previous() {
        let reg = registry();
        let (a, _ra) = ChannelTransport::new(4);
        let (b, _rb) = ChannelTransport::new(4);

        assert!(!reg.bind(NodeId(1), a.clone()));
        assert!(reg.bind(NodeId(1), b.clone()));

        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert_eq!(reg.bound_transport(NodeId(1)), Some(b.id()));
        assert_eq!(reg.connected().len(), 1);
    }

    #[test]
    fn test_rebinding_same_transport_is_not_an_eviction() {
        let reg = registry();
        let (a, _ra) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a.clone());
        assert!(!reg.bind(NodeId(1), a.clone()));
        assert!(!a.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_disconnect_is_noop() {
        let reg = registry();
        let (a, _ra) = ChannelTransport::new(4);
        let (b, _rb) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a.clone());
        reg.bind(NodeId(1), b.clone());

        assert!(!reg.unbind(NodeId(1), a.id()));
        assert!(reg.is_connected(NodeId(1)));
        assert!(!reg.is_grace_pending(NodeId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_arms_grace_and_rebind_cancels_it() {
        let reg = registry();
        let (a, _ra) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a.clone());
        assert!(reg.unbind(NodeId(1), a.id()));
        assert!(!reg.is_connected(NodeId(1)));
        assert!(reg.is_grace_pending(NodeId(1)));
        assert_eq!(
            reg.next_grace_deadline(),
            Some(Instant::now() + Duration::from_secs(5))
        );

        let (b, _rb) = ChannelTransport::new(4);
        reg.bind(NodeId(1), b);
        assert!(!reg.is_grace_pending(NodeId(1)));
        assert!(reg.take_expired(Instant::now() + Duration::from_secs(60)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_expired_only_returns_due_unbound_nodes() {
        let reg = registry();
        for n in 1..=2 {
            let (t, _r) = ChannelTransport::new(4);
            reg.bind(NodeId(n), t.clone());
            reg.unbind(NodeId(n), t.id());
            tokio::time::advance(Duration::from_secs(3)).await;
        }

        let now = Instant::now();
        let expired = reg.take_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].node, NodeId(1));
        assert!(reg.is_grace_pending(NodeId(2)));
    }

    #[test]
    fn test_send_if_connected() {
        let reg = registry();
        let frame = || Outbound::HeartbeatAck {
            next_heartbeat_secs: 30,
        };
        assert!(!reg.send_if_connected(NodeId(1), frame()));

        let (a, mut ra) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a);
        assert!(reg.send_if_connected(NodeId(1), frame()));
        assert_eq!(ra.try_recv().ok(), Some(frame()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_grace_period_is_clamped() {
        let reg = ConnectionRegistry::new(Duration::from_secs(u64::MAX), Bus::new(4));
        assert_eq!(reg.grace_period(), MAX_PERIOD);

        let (a, _ra) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a.clone());
        assert!(reg.unbind(NodeId(1), a.id()));
        assert_eq!(reg.next_grace_deadline(), Some(Instant::now() + MAX_PERIOD));
    }

    #[test]
    fn test_evict_closes_without_grace() {
        let reg = registry();
        let (a, _ra) = ChannelTransport::new(4);
        reg.bind(NodeId(1), a.clone());
        assert!(reg.evict(NodeId(1)));
        assert!(a.is_closed());
        assert!(!reg.is_grace_pending(NodeId(1)));
        assert!(!reg.evict(NodeId(1)));
    }

    #[test]
    fn test_at_most_one_binding_under_interleaving() {
        let reg = Arc::new(registry());
        let mut held = Vec::new();
        for i in 0..20u64 {
            let (t, r) = ChannelTransport::new(1);
            reg.bind(NodeId(i % 3), t.clone());
            if i % 4 == 0 {
                reg.unbind(NodeId(i % 3), t.id());
            }
            held.push((t, r));
        }
        let live: Vec<_> = held.iter().filter(|(t, _)| !t.is_closed()).collect();
        for c in reg.connected() {
            assert!(live.iter().any(|(t, _)| t.id() == c.transport));
        }
        assert!(reg.connected().len() <= 3);
    }
}
