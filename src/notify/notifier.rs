//! # Notifier trait
//!
//! `Notify` is the outbound extension point of the control plane: consoles, push
//! gateways and audit sinks implement it to learn about node status edges,
//! aggregate preset status and dispatch summaries. Each notifier is driven by a
//! dedicated worker fed by a bounded queue owned by the
//! [`NotifierSet`](crate::notify::NotifierSet).
//!
//! ## Contract
//! - Implementations may be slow; they do **not** block the publisher nor other notifiers.
//! - The default [`Notify::on_event`] routes the three domain callbacks; override it to
//!   observe every event instead.
//! - On queue overflow events for that notifier are **dropped** and reported as
//!   `NotifierOverflow`.

use async_trait::async_trait;

use crate::dispatch::DispatchResult;
use crate::events::{Event, EventKind};
use crate::model::{NodeId, NodeStatus, PresetStatus};

/// Contract for event notifiers.
#[async_trait]
pub trait Notify: Send + Sync + 'static {
    /// A node's status changed.
    async fn on_status_changed(&self, _node: NodeId, _status: NodeStatus) {}

    /// A preset's aggregate status was recomputed.
    async fn on_operation_status_changed(&self, _status: &PresetStatus) {}

    /// A dispatch finished.
    async fn on_dispatch_completed(&self, _result: &DispatchResult) {}

    /// Handles a single bus event.
    ///
    /// The default implementation routes to the typed callbacks and ignores everything else.
    async fn on_event(&self, event: &Event) {
        match event.kind {
            EventKind::NodeStatusChanged => {
                if let (Some(node), Some(status)) = (event.node, event.status) {
                    self.on_status_changed(node, status).await;
                }
            }
            EventKind::OperationStatusChanged => {
                if let Some(status) = event.preset_status.as_deref() {
                    self.on_operation_status_changed(status).await;
                }
            }
            EventKind::DispatchCompleted => {
                if let Some(result) = event.dispatch.as_deref() {
                    self.on_dispatch_completed(result).await;
                }
            }
            _ => {}
        }
    }

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this notifier's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
