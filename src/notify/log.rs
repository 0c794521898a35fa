//! # LogNotifier
//!
//! Built-in notifier that writes every event through `tracing`.
//!
//! ## Example output
//! ```text
//! INFO  node bound node=3
//! INFO  node status changed node=3 from=online to=offline reason=sweep
//! INFO  dispatch completed preset=7 total=5 online=3 offline=2 executed=3 warnings=2
//! WARN  notifier dropped event notifier="console" reason=full
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Notify;
use crate::events::{Event, EventKind};

/// Event logger.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[async_trait]
impl Notify for LogNotifier {
    async fn on_event(&self, e: &Event) {
        let node = opt(e.node);
        let preset = opt(e.preset);
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::NodeRegistered => info!(%node, name = reason, "node registered"),
            EventKind::NodeBound => info!(%node, "node bound"),
            EventKind::NodeEvicted => info!(%node, reason, "previous transport evicted"),
            EventKind::NodeUnbound => info!(%node, "node unbound, grace armed"),
            EventKind::GraceExpired => info!(%node, "grace expired"),
            EventKind::NodeStatusChanged => info!(
                %node,
                from = %opt(e.previous),
                to = %opt(e.status),
                reason,
                "node status changed"
            ),
            EventKind::SweepCompleted => debug!(offline = e.count.unwrap_or(0), "sweep completed"),
            EventKind::SweepSkipped => warn!("sweep skipped, previous still running"),
            EventKind::StoreFailed => warn!(%node, %preset, reason, "store write failed"),
            EventKind::DispatchCompleted => {
                if let Some(d) = e.dispatch.as_deref() {
                    info!(
                        %preset,
                        total = d.total,
                        online = d.online,
                        offline = d.offline,
                        executed = d.executed,
                        warnings = d.warnings.len(),
                        "dispatch completed"
                    );
                }
            }
            EventKind::StopCompleted => info!(%preset, stopped = e.count.unwrap_or(0), "stop completed"),
            EventKind::OperationStatusChanged => {
                if let Some(s) = e.preset_status.as_deref() {
                    info!(%preset, status = %s.state, color = %s.color, "preset status");
                }
            }
            EventKind::NotifierOverflow | EventKind::NotifierPanicked => {
                warn!(notifier = e.source.unwrap_or("unknown"), reason, "notifier fault")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
