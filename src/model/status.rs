use std::fmt;

use serde::{Deserialize, Serialize};

use super::PresetId;

/// Derived status of a preset across its target nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    /// Every target runs the preset.
    Running,
    /// Some, not all, targets run the preset.
    Partial,
    /// Nothing runs the preset and at least one target is online.
    Ready,
    /// Nothing runs the preset and no target is online (also an empty group).
    Offline,
    /// Fallback when no other rule matches.
    Stopped,
}

impl AggregateState {
    /// Display color used by operator consoles.
    pub fn color(self) -> &'static str {
        match self {
            AggregateState::Running => "green",
            AggregateState::Partial => "yellow",
            AggregateState::Ready => "blue",
            AggregateState::Offline => "red",
            AggregateState::Stopped => "gray",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateState::Running => "running",
            AggregateState::Partial => "partial",
            AggregateState::Ready => "ready",
            AggregateState::Offline => "offline",
            AggregateState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node counts behind an [`AggregateState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    /// Running this preset.
    pub running: usize,
    pub online: usize,
    /// Offline, crashed, or running a different preset.
    pub other: usize,
}

/// Aggregate status of one preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetStatus {
    pub preset: PresetId,
    pub state: AggregateState,
    pub color: String,
    pub counts: StatusCounts,
}

impl PresetStatus {
    pub fn new(preset: PresetId, state: AggregateState, counts: StatusCounts) -> Self {
        Self {
            preset,
            state,
            color: state.color().to_string(),
            counts,
        }
    }

    /// True when at least one target runs the preset.
    #[inline]
    pub fn any_running(&self) -> bool {
        self.counts.running > 0
    }
}
