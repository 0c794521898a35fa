//! # Transport handles.
//!
//! A [`Transport`] is the registry's view of one live connection: an identity for
//! stale-disconnect detection, a non-blocking `send`, and `close`.
//!
//! [`ChannelTransport`] backs both the TCP sessions (a writer task drains its queue
//! onto the socket) and tests (the test holds the receiving end).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::protocol::Outbound;

static TRANSPORT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocates the next id.
    pub fn next() -> Self {
        Self(TRANSPORT_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Contract for a live connection handle.
pub trait Transport: Send + Sync + 'static {
    fn id(&self) -> TransportId;

    /// Queues a frame. Never waits for delivery.
    fn send(&self, frame: Outbound) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Shared handle to a transport.
pub type TransportRef = Arc<dyn Transport>;

/// Transport backed by a bounded mpsc queue and a cancellation token.
pub struct ChannelTransport {
    id: TransportId,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl ChannelTransport {
    /// Creates a transport and the receiving end of its outbound queue.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let t = Arc::new(Self {
            id: TransportId::next(),
            tx,
            closed: CancellationToken::new(),
        });
        (t, rx)
    }

    /// Token cancelled when the transport is closed (by eviction or by the session).
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, frame: Outbound) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}
