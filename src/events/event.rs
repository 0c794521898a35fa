//! # Domain events emitted by the control plane.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Connection events**: bindings created, evicted, dropped, grace expiry
//! - **Liveness events**: node status edges, sweeps
//! - **Operation events**: dispatch/stop completion, aggregate status changes
//! - **Notifier events**: overflow and panics inside notifier workers
//!
//! The [`Event`] struct carries optional metadata (node, preset, statuses, reason,
//! dispatch summary) depending on the kind.
//!
//! ## Ordering
//! `seq` comes from one process-wide counter, so sorting by `seq` gives publish order
//! even for events that reached a notifier through different queues.
//!
//! ## Example
//! ```rust
//! use switchboard::{Event, EventKind, NodeId, NodeStatus};
//!
//! let ev = Event::new(EventKind::NodeStatusChanged)
//!     .with_node(NodeId(3))
//!     .with_transition(NodeStatus::Online, NodeStatus::Offline)
//!     .with_reason("sweep");
//!
//! assert_eq!(ev.node, Some(NodeId(3)));
//! assert_eq!(ev.status, Some(NodeStatus::Offline));
//! assert_eq!(ev.reason.as_deref(), Some("sweep"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::dispatch::{DispatchResult, StopResult};
use crate::model::{NodeId, NodeStatus, PresetId, PresetStatus};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of control-plane events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Connection events ===
    /// First registration from an unknown address created a node.
    ///
    /// Sets: `node`, `reason` (claimed name)
    NodeRegistered,

    /// A transport was bound to a node identity.
    ///
    /// Sets: `node`
    NodeBound,

    /// A previous transport was closed because a newer one registered.
    ///
    /// Sets: `node`, `reason`
    NodeEvicted,

    /// The bound transport closed; a grace deadline was armed.
    ///
    /// Sets: `node`
    NodeUnbound,

    /// Grace deadline passed without a new binding.
    ///
    /// Sets: `node`
    GraceExpired,

    // === Liveness events ===
    /// Node status edge.
    ///
    /// Sets: `node`, `previous`, `status`, `reason` (trigger)
    NodeStatusChanged,

    /// Liveness sweep finished.
    ///
    /// Sets: `count` (nodes forced offline)
    SweepCompleted,

    /// Sweep tick skipped because the previous sweep was still running.
    SweepSkipped,

    /// A store write failed; in-memory transitions were not rolled back.
    ///
    /// Sets: `node` (if any), `preset` (if any), `reason`
    StoreFailed,

    // === Operation events ===
    /// Dispatch finished (including zero-target dispatches).
    ///
    /// Sets: `preset`, `dispatch`
    DispatchCompleted,

    /// Stop finished.
    ///
    /// Sets: `preset`, `count` (nodes stopped)
    StopCompleted,

    /// Aggregate status of a preset was recomputed.
    ///
    /// Sets: `preset`, `preset_status`
    OperationStatusChanged,

    // === Notifier events ===
    /// Notifier panicked during event processing.
    ///
    /// Sets: `source` (notifier name), `reason` (panic message)
    NotifierPanicked,

    /// Notifier dropped an event (queue full or worker closed).
    ///
    /// Sets: `source` (notifier name), `reason` ("full" / "closed")
    NotifierOverflow,
}

/// Control-plane event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    pub node: Option<NodeId>,
    pub preset: Option<PresetId>,
    /// New node status.
    pub status: Option<NodeStatus>,
    /// Node status before the edge.
    pub previous: Option<NodeStatus>,
    /// Human-readable reason (trigger, error, overflow details).
    pub reason: Option<Arc<str>>,
    /// Name of the emitting notifier, for notifier events.
    pub source: Option<&'static str>,
    /// Generic counter (sweep casualties, stopped nodes).
    pub count: Option<u32>,
    pub preset_status: Option<Arc<PresetStatus>>,
    pub dispatch: Option<Arc<DispatchResult>>,
}

impl Event {
    /// Stamps a bare event of `kind` with the next `seq` and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            node: None,
            preset: None,
            status: None,
            previous: None,
            reason: None,
            source: None,
            count: None,
            preset_status: None,
            dispatch: None,
        }
    }

    #[inline]
    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    #[inline]
    pub fn with_preset(mut self, preset: PresetId) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Attaches a status edge `previous → status`.
    #[inline]
    pub fn with_transition(mut self, previous: NodeStatus, status: NodeStatus) -> Self {
        self.previous = Some(previous);
        self.status = Some(status);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Creates an operation status event.
    pub fn operation_status(status: PresetStatus) -> Self {
        let mut ev = Event::new(EventKind::OperationStatusChanged).with_preset(status.preset);
        ev.preset_status = Some(Arc::new(status));
        ev
    }

    /// Creates a dispatch completion event.
    pub fn dispatch_completed(result: DispatchResult) -> Self {
        let mut ev = Event::new(EventKind::DispatchCompleted).with_preset(result.preset);
        ev.dispatch = Some(Arc::new(result));
        ev
    }

    /// Creates a stop completion event.
    pub fn stop_completed(result: &StopResult) -> Self {
        Event::new(EventKind::StopCompleted)
            .with_preset(result.preset)
            .with_count(result.stopped)
    }

    /// Creates a store failure event.
    pub fn store_failed(op: &'static str, err: &crate::error::StoreError) -> Self {
        Event::new(EventKind::StoreFailed).with_reason(format!("op={op} err={err}"))
    }

    /// Creates a notifier overflow event.
    #[inline]
    pub fn notifier_overflow(notifier: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::NotifierOverflow)
            .with_reason(format!("notifier={notifier} reason={reason}"));
        ev.source = Some(notifier);
        ev
    }

    /// Creates a notifier panic event.
    #[inline]
    pub fn notifier_panicked(notifier: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::NotifierPanicked).with_reason(info);
        ev.source = Some(notifier);
        ev
    }

    #[inline]
    pub fn is_notifier_overflow(&self) -> bool {
        matches!(self.kind, EventKind::NotifierOverflow)
    }
}
