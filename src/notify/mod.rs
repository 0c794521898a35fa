//! # Outbound notifiers.
//!
//! ```text
//! Bus ──► notifier listener ──► NotifierSet::emit(event)
//!                                  ├──► LogNotifier      (tracing)
//!                                  ├──► console push     (user)
//!                                  └──► ...
//! ```
//!
//! Implement [`Notify`] to receive `on_status_changed`, `on_operation_status_changed`
//! and `on_dispatch_completed`, or override `on_event` for the raw stream.

mod log;
mod notifier;
mod set;

pub use log::LogNotifier;
pub use notifier::Notify;
pub use set::NotifierSet;
