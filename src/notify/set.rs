//! # Non-blocking event fan-out to multiple notifiers.
//!
//! ```text
//! NotifierSet::emit(event)
//!     │
//!     ├──► queue 1 ──► drain ──► notifier1.on_event()
//!     │                  └─────► panic ─► Bus: NotifierPanicked
//!     ├──► queue 2 (full) ─► Bus: NotifierOverflow
//!     └──► queue N ──► drain ──► notifierN.on_event()
//! ```
//!
//! ## Rules
//! - `emit` never waits: each queue is fed with `try_send`
//! - **Per-notifier FIFO**: each notifier sees events in bus order
//! - **Overflow**: event dropped for that notifier only, `NotifierOverflow` published
//! - **Isolation**: a panicking notifier is reported and keeps receiving events
//!
//! **Warning**: `AssertUnwindSafe` is used; a notifier that panics while holding a
//! lock can leave its own state inconsistent.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::Notify;
use crate::events::{Bus, Event};

struct Queue {
    notifier: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Per-notifier queues and their worker tasks.
pub struct NotifierSet {
    queues: Vec<Queue>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl NotifierSet {
    /// Spawns one worker per notifier. Queue capacity comes from
    /// [`Notify::queue_capacity`] (at least 1).
    #[must_use]
    pub fn new(notifiers: Vec<Arc<dyn Notify>>, bus: Bus) -> Self {
        let (queues, workers) = notifiers
            .into_iter()
            .map(|n| {
                let notifier = n.name();
                let (tx, rx) = mpsc::channel::<Arc<Event>>(n.queue_capacity().max(1));
                let worker = tokio::spawn(drain(n, rx, bus.clone()));
                (Queue { notifier, tx }, worker)
            })
            .unzip();
        Self {
            queues,
            workers,
            bus,
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queues `event` for every notifier without waiting.
    ///
    /// A dropped overflow event is not reported again.
    pub fn emit(&self, event: Event) {
        let report = !event.is_notifier_overflow();
        let event = Arc::new(event);

        for q in &self.queues {
            let reason = match q.tx.try_send(event.clone()) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if report {
                warn!(notifier = q.notifier, reason, "notifier dropped event");
                self.bus.publish(Event::notifier_overflow(q.notifier, reason));
            }
        }
    }

    /// Closes the queues and waits until every worker has drained its backlog.
    pub async fn shutdown(self) {
        drop(self.queues);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(err = %e, "notifier worker aborted");
            }
        }
    }
}

async fn drain(notifier: Arc<dyn Notify>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    let name = notifier.name();
    while let Some(ev) = rx.recv().await {
        let delivery = AssertUnwindSafe(notifier.on_event(&ev)).catch_unwind();
        if let Err(payload) = delivery.await {
            let info = panic_message(payload.as_ref());
            error!(notifier = name, %info, "notifier panicked");
            bus.publish(Event::notifier_panicked(name, info));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
