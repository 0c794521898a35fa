use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NodeId, PresetId};

/// Liveness state of a node.
///
/// The machine is cyclic: `offline → online → {online, running, crashed} → offline`.
/// `Offline` is also the state of a node created by an operator before it ever connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Offline,
    Online,
    Running,
    Crashed,
}

impl NodeStatus {
    /// Returns the wire/storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Offline => "offline",
            NodeStatus::Online => "online",
            NodeStatus::Running => "running",
            NodeStatus::Crashed => "crashed",
        }
    }

    /// True for every state the liveness sweep is allowed to force offline.
    #[inline]
    pub fn is_live(self) -> bool {
        !matches!(self, NodeStatus::Offline)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(NodeStatus::Offline),
            "online" => Ok(NodeStatus::Online),
            "running" => Ok(NodeStatus::Running),
            "crashed" => Ok(NodeStatus::Crashed),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

/// A remote rendering client, identified durably by its network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Mutable label; unique at any point in time.
    pub name: String,
    /// Durable identity key.
    pub address: String,
    pub status: NodeStatus,
    /// Updated by every liveness signal. `None` until the node is first heard from.
    pub last_seen: Option<DateTime<Utc>>,
    /// Preset currently executing on this node.
    pub active_preset: Option<PresetId>,
}

impl Node {
    /// Returns true if this node is running the given preset.
    #[inline]
    pub fn is_running(&self, preset: PresetId) -> bool {
        self.status == NodeStatus::Running && self.active_preset == Some(preset)
    }
}

/// Insert payload for a new [`Node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub name: String,
    pub address: String,
    pub status: NodeStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NewNode {
    /// A node created by an operator: offline and never seen.
    pub fn declared(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            status: NodeStatus::Offline,
            last_seen: None,
        }
    }

    /// A node created by its own registration: online and seen now.
    pub fn registered(name: impl Into<String>, address: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            status: NodeStatus::Online,
            last_seen: Some(at),
        }
    }
}

/// One entry of the name-history side table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChange {
    pub address: String,
    pub previous: String,
    pub current: String,
    pub at: DateTime<Utc>,
}
