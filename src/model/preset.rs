use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{GroupId, PresetId};

/// Node identifier (id as decimal string, or display name) → command string.
pub type CommandMap = BTreeMap<String, String>;

/// A named command map applied to a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    pub group: GroupId,
    pub commands: CommandMap,
    /// Best-effort cache of "any target is running this preset".
    ///
    /// Never authoritative; the aggregate status is recomputed from node states.
    pub is_running: bool,
}
