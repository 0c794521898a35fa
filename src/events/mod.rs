//! Control-plane events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `ConnectionRegistry`, `Liveness`, `Dispatcher`,
//!   `NotifierSet` workers (overflow/panic).
//! - **Consumers**: `ControlPlane`'s notifier listener (fans out to `NotifierSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
