use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{GroupId, NodeId};

/// Named membership set of nodes. Ordering of members is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub members: BTreeSet<NodeId>,
}

impl Group {
    /// Returns true if the node belongs to this group.
    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }
}
