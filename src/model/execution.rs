use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionId, NodeId, PresetId};

/// Outcome of one dispatch leg.
///
/// Records are append-only; the only permitted mutation narrows
/// `Executing` into `Completed` or `Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Executing,
    Completed,
    FailedOffline,
    Crashed,
}

impl ExecutionStatus {
    /// Returns the storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::FailedOffline => "failed_offline",
            ExecutionStatus::Crashed => "crashed",
        }
    }

    /// True if a record in this state may still be narrowed.
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, ExecutionStatus::Executing)
    }
}

/// Persisted dispatch leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub preset: PresetId,
    pub node: NodeId,
    pub status: ExecutionStatus,
    pub executed_at: DateTime<Utc>,
}

/// Insert payload for an [`ExecutionRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecutionRecord {
    pub preset: PresetId,
    pub node: NodeId,
    pub status: ExecutionStatus,
    pub executed_at: DateTime<Utc>,
}
