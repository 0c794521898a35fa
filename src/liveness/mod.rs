//! # Liveness tracking.
//!
//! - [`Liveness`]: the per-node state machine
//! - [`run_sweeper`]: periodic timeout sweep on its own ticker
//! - [`run_grace_reaper`]: single cancellable task servicing reconnection grace deadlines
//!
//! ```text
//! inbound frames ──► Liveness ──► Store (status, lastSeen, active preset)
//!                        │
//!                        └──► Bus: NodeStatusChanged / OperationStatusChanged
//!
//! sweeper ── every sweep_interval ──► Liveness::sweep_once
//! reaper  ── earliest grace deadline ──► ConnectionRegistry::take_expired
//!                                        └─► Liveness::mark_unreachable
//! ```

mod machine;
mod reaper;
mod sweeper;

pub use machine::{Liveness, SweepReport};
pub use reaper::run_grace_reaper;
pub use sweeper::run_sweeper;
