//! # Event bus.
//!
//! Every component that changes state publishes an [`Event`] here. The control plane's
//! notifier listener is the main consumer; tests and embedders may subscribe too.
//!
//! ```text
//!   ConnectionRegistry ──┐
//!   IdentityResolver   ──┤
//!   Liveness           ──┼──► Bus ──┬──► ControlPlane listener ──► NotifierSet
//!   StatusAggregator   ──┤          └──► subscribe() (tests, embedders)
//!   Dispatcher         ──┘
//! ```
//!
//! ## Rules
//! - `publish` never waits; with no receivers the event is dropped.
//! - One bounded ring is shared by all receivers; a receiver that falls behind gets
//!   `RecvError::Lagged(n)` and resumes at the oldest retained event.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable handle to the control-plane event channel.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus retaining up to `capacity` events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: Event) {
        // Err only means nobody is listening.
        let _ = self.tx.send(ev);
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
