//! # Command dispatch and status aggregation.
//!
//! - [`Dispatcher`]: fans a preset's command map out to the reachable group members
//! - [`resolve_command`]: ordered per-node command lookup
//! - [`aggregate`] / [`StatusAggregator`]: derived preset status

mod aggregate;
mod dispatcher;
mod resolve;

pub use aggregate::{aggregate, StatusAggregator};
pub use dispatcher::{DispatchLeg, DispatchResult, Dispatcher, LegOutcome, StopResult};
pub use resolve::{normalize_name, resolve_command, CommandKey, ResolvedCommand};
