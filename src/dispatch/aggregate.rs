//! # Preset status aggregation.
//!
//! [`aggregate`] is a pure function of the current node states; [`StatusAggregator`]
//! loads those states from the store, publishes the result and refreshes the
//! preset's `is_running` cache.
//!
//! ## Rule
//! With `R` = targets running this preset, `O` = targets online, `F` = everything
//! else and `T` = total, the first matching row wins:
//! ```text
//! R == 0 && F == T   → offline  (red)     includes an empty group
//! R == 0 && O  > 0   → ready    (blue)
//! R == T && T  > 0   → running  (green)
//! 0 < R < T          → partial  (yellow)
//! otherwise          → stopped  (gray)
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::{Bus, Event};
use crate::model::{AggregateState, Node, NodeStatus, PresetId, PresetStatus, StatusCounts};
use crate::store::{Store, StoreResult};

/// Computes the aggregate status of `preset` over `targets`.
pub fn aggregate(preset: PresetId, targets: &[Node]) -> PresetStatus {
    let total = targets.len();
    let running = targets.iter().filter(|n| n.is_running(preset)).count();
    let online = targets
        .iter()
        .filter(|n| n.status == NodeStatus::Online)
        .count();
    let other = total - running - online;

    let state = if running == 0 && other == total {
        AggregateState::Offline
    } else if running == 0 && online > 0 {
        AggregateState::Ready
    } else if total > 0 && running == total {
        AggregateState::Running
    } else if running > 0 && running < total {
        AggregateState::Partial
    } else {
        AggregateState::Stopped
    };

    PresetStatus::new(
        preset,
        state,
        StatusCounts {
            total,
            running,
            online,
            other,
        },
    )
}

/// Store-backed aggregation and notification.
pub struct StatusAggregator {
    store: Arc<dyn Store>,
    bus: Bus,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn Store>, bus: Bus) -> Self {
        Self { store, bus }
    }

    /// Computes the current status without side effects.
    pub async fn status(&self, preset: PresetId) -> StoreResult<PresetStatus> {
        let p = self.store.load_operation(preset).await?;
        let targets = self.store.load_group_members(p.group).await?;
        Ok(aggregate(p.id, &targets))
    }

    /// Recomputes the status, publishes `OperationStatusChanged` and syncs the
    /// `is_running` cache. A failed cache write is logged only.
    pub async fn refresh(&self, preset: PresetId) -> StoreResult<PresetStatus> {
        let p = self.store.load_operation(preset).await?;
        let targets = self.store.load_group_members(p.group).await?;
        let status = aggregate(p.id, &targets);

        if p.is_running != status.any_running() {
            if let Err(e) = self
                .store
                .set_operation_running(p.id, status.any_running())
                .await
            {
                warn!(preset = %p.id, err = %e, "failed to update running cache");
                self.bus
                    .publish(Event::store_failed("set_operation_running", &e).with_preset(p.id));
            }
        }

        debug!(preset = %p.id, status = %status.state, "preset status recomputed");
        self.bus.publish(Event::operation_status(status.clone()));
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    const P: PresetId = PresetId(1);

    fn node(id: u64, status: NodeStatus, active: Option<PresetId>) -> Node {
        Node {
            id: NodeId(id),
            name: format!("n{id}"),
            address: format!("10.0.0.{id}"),
            status,
            last_seen: None,
            active_preset: active,
        }
    }

    #[test]
    fn test_empty_group_is_offline() {
        let s = aggregate(P, &[]);
        assert_eq!(s.state, AggregateState::Offline);
        assert_eq!(s.color, "red");
    }

    #[test]
    fn test_all_offline_or_crashed_is_offline() {
        let s = aggregate(
            P,
            &[
                node(1, NodeStatus::Offline, None),
                node(2, NodeStatus::Crashed, None),
            ],
        );
        assert_eq!(s.state, AggregateState::Offline);
    }

    #[test]
    fn test_some_online_nothing_running_is_ready() {
        let s = aggregate(
            P,
            &[
                node(1, NodeStatus::Online, None),
                node(2, NodeStatus::Offline, None),
            ],
        );
        assert_eq!(s.state, AggregateState::Ready);
        assert_eq!(s.color, "blue");
    }

    #[test]
    fn test_all_running_is_running() {
        let s = aggregate(
            P,
            &[
                node(1, NodeStatus::Running, Some(P)),
                node(2, NodeStatus::Running, Some(P)),
            ],
        );
        assert_eq!(s.state, AggregateState::Running);
        assert_eq!(s.color, "green");
    }

    #[test]
    fn test_some_running_is_partial() {
        let s = aggregate(
            P,
            &[
                node(1, NodeStatus::Running, Some(P)),
                node(2, NodeStatus::Offline, None),
            ],
        );
        assert_eq!(s.state, AggregateState::Partial);
        assert_eq!(s.color, "yellow");
        assert_eq!(
            s.counts,
            StatusCounts {
                total: 2,
                running: 1,
                online: 0,
                other: 1
            }
        );
    }

    #[test]
    fn test_running_other_preset_counts_as_other() {
        let s = aggregate(P, &[node(1, NodeStatus::Running, Some(PresetId(9)))]);
        assert_eq!(s.state, AggregateState::Offline);
        assert_eq!(s.counts.other, 1);
    }

    #[test]
    fn test_aggregate_is_pure() {
        let targets = [
            node(1, NodeStatus::Running, Some(P)),
            node(2, NodeStatus::Online, None),
        ];
        assert_eq!(aggregate(P, &targets), aggregate(P, &targets));
    }
}
