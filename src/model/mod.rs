//! # Domain records shared by every component.
//!
//! - [`Node`] / [`NodeStatus`]: a remote rendering client and its liveness state
//! - [`Group`]: membership set of nodes
//! - [`Preset`] / [`CommandMap`]: an operation targeting a group
//! - [`ExecutionRecord`] / [`ExecutionStatus`]: one dispatch leg
//! - [`PresetStatus`] / [`AggregateState`]: derived status of a preset
//!
//! Identifiers are opaque newtypes over `u64` so a node id can never be passed
//! where a preset id is expected.

mod execution;
mod group;
mod node;
mod preset;
mod status;

pub use execution::{ExecutionRecord, ExecutionStatus, NewExecutionRecord};
pub use group::Group;
pub use node::{NameChange, NewNode, Node, NodeStatus};
pub use preset::{CommandMap, Preset};
pub use status::{AggregateState, PresetStatus, StatusCounts};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw numeric value.
            #[inline]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Stable surrogate key of a [`Node`].
    NodeId
);
id_type!(
    /// Key of a [`Group`].
    GroupId
);
id_type!(
    /// Key of a [`Preset`] (an "operation").
    PresetId
);
id_type!(
    /// Key of an [`ExecutionRecord`].
    ExecutionId
);
