//! # In-memory [`Store`] implementation.
//!
//! All tables live behind one `tokio::sync::RwLock`; every trait call takes the
//! lock once and releases it before returning, so calls are atomic and short.
//!
//! Besides the [`Store`] contract it exposes the catalog operations an operator
//! console needs (groups, presets, memberships) and a switch that makes every
//! write fail, used to exercise store-failure paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Store, StoreResult};
use crate::error::StoreError;
use crate::model::{
    CommandMap, ExecutionId, ExecutionRecord, ExecutionStatus, Group, GroupId, NameChange,
    NewExecutionRecord, NewNode, Node, NodeId, NodeStatus, Preset, PresetId,
};

#[derive(Default)]
struct Tables {
    next_id: u64,
    nodes: BTreeMap<NodeId, Node>,
    groups: BTreeMap<GroupId, Group>,
    presets: BTreeMap<PresetId, Preset>,
    executions: BTreeMap<ExecutionId, ExecutionRecord>,
    name_history: HashMap<String, Vec<NameChange>>,
}

impl Tables {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node", id))
    }
}

/// Store backed by in-process maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Backend`] while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::backend("store unavailable"))
        } else {
            Ok(())
        }
    }

    // === Catalog ===

    /// Creates an empty group. Names are unique.
    pub async fn create_group(&self, name: &str) -> StoreResult<Group> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if t.groups.values().any(|g| g.name == name) {
            return Err(StoreError::conflict("group", name));
        }
        let id = GroupId(t.next());
        let group = Group {
            id,
            name: name.to_string(),
            members: BTreeSet::new(),
        };
        t.groups.insert(id, group.clone());
        Ok(group)
    }

    pub async fn get_group(&self, id: GroupId) -> StoreResult<Group> {
        self.tables
            .read()
            .await
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", id))
    }

    /// Adds a node to a group. Adding an existing member is a no-op.
    pub async fn add_member(&self, group: GroupId, node: NodeId) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if !t.nodes.contains_key(&node) {
            return Err(StoreError::not_found("node", node));
        }
        let g = t
            .groups
            .get_mut(&group)
            .ok_or_else(|| StoreError::not_found("group", group))?;
        g.members.insert(node);
        Ok(())
    }

    /// Removes a node from a group; returns whether it was a member.
    pub async fn remove_member(&self, group: GroupId, node: NodeId) -> StoreResult<bool> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let g = t
            .groups
            .get_mut(&group)
            .ok_or_else(|| StoreError::not_found("group", group))?;
        Ok(g.members.remove(&node))
    }

    /// Creates a preset targeting an existing group. Names are unique.
    pub async fn create_preset(
        &self,
        name: &str,
        group: GroupId,
        commands: CommandMap,
    ) -> StoreResult<Preset> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if !t.groups.contains_key(&group) {
            return Err(StoreError::not_found("group", group));
        }
        if t.presets.values().any(|p| p.name == name) {
            return Err(StoreError::conflict("preset", name));
        }
        let id = PresetId(t.next());
        let preset = Preset {
            id,
            name: name.to_string(),
            group,
            commands,
            is_running: false,
        };
        t.presets.insert(id, preset.clone());
        Ok(preset)
    }

    pub async fn list_presets(&self) -> StoreResult<Vec<Preset>> {
        Ok(self.tables.read().await.presets.values().cloned().collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_node_by_address(&self, address: &str) -> StoreResult<Option<Node>> {
        let t = self.tables.read().await;
        Ok(t.nodes.values().find(|n| n.address == address).cloned())
    }

    async fn find_node_by_name(&self, name: &str) -> StoreResult<Option<Node>> {
        let t = self.tables.read().await;
        Ok(t.nodes.values().find(|n| n.name == name).cloned())
    }

    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.tables.read().await.nodes.get(&id).cloned())
    }

    async fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.tables.read().await.nodes.values().cloned().collect())
    }

    async fn create_node(&self, new: NewNode) -> StoreResult<Node> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if t.nodes.values().any(|n| n.address == new.address) {
            return Err(StoreError::conflict("node", &new.address));
        }
        let stale: Vec<NodeId> = t
            .nodes
            .values()
            .filter(|n| n.name == new.name)
            .map(|n| n.id)
            .collect();
        for id in stale {
            t.nodes.remove(&id);
            for g in t.groups.values_mut() {
                g.members.remove(&id);
            }
        }

        let id = NodeId(t.next());
        let node = Node {
            id,
            name: new.name,
            address: new.address,
            status: new.status,
            last_seen: new.last_seen,
            active_preset: None,
        };
        t.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn rename_node(&self, id: NodeId, name: &str) -> StoreResult<Node> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if t.nodes.values().any(|n| n.name == name && n.id != id) {
            return Err(StoreError::conflict("node", name));
        }
        let node = t.node_mut(id)?;
        if node.name == name {
            return Ok(node.clone());
        }
        let change = NameChange {
            address: node.address.clone(),
            previous: std::mem::replace(&mut node.name, name.to_string()),
            current: name.to_string(),
            at: Utc::now(),
        };
        let renamed = node.clone();
        t.name_history
            .entry(change.address.clone())
            .or_default()
            .push(change);
        Ok(renamed)
    }

    async fn delete_node(&self, id: NodeId) -> StoreResult<Node> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let node = t
            .nodes
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("node", id))?;
        for g in t.groups.values_mut() {
            g.members.remove(&id);
        }
        Ok(node)
    }

    async fn update_node_status(&self, id: NodeId, status: NodeStatus) -> StoreResult<NodeStatus> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let node = t.node_mut(id)?;
        Ok(std::mem::replace(&mut node.status, status))
    }

    async fn touch_node(&self, id: NodeId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        t.node_mut(id)?.last_seen = Some(at);
        Ok(())
    }

    async fn set_active_operation(&self, id: NodeId, preset: Option<PresetId>) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        t.node_mut(id)?.active_preset = preset;
        Ok(())
    }

    async fn name_history(&self, address: &str) -> StoreResult<Vec<NameChange>> {
        let t = self.tables.read().await;
        Ok(t.name_history.get(address).cloned().unwrap_or_default())
    }

    async fn append_execution_record(&self, rec: NewExecutionRecord) -> StoreResult<ExecutionRecord> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let id = ExecutionId(t.next());
        let record = ExecutionRecord {
            id,
            preset: rec.preset,
            node: rec.node,
            status: rec.status,
            executed_at: rec.executed_at,
        };
        t.executions.insert(id, record.clone());
        Ok(record)
    }

    async fn find_open_execution(
        &self,
        node: NodeId,
        preset: PresetId,
    ) -> StoreResult<Option<ExecutionRecord>> {
        let t = self.tables.read().await;
        Ok(t.executions
            .values()
            .rev()
            .find(|r| r.node == node && r.preset == preset && r.status.is_open())
            .cloned())
    }

    async fn complete_execution(
        &self,
        id: ExecutionId,
        node: NodeId,
        status: ExecutionStatus,
    ) -> StoreResult<Option<ExecutionRecord>> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let rec = t
            .executions
            .get_mut(&id)
            .filter(|r| r.node == node)
            .ok_or_else(|| StoreError::not_found("execution", id))?;
        if !rec.status.is_open() {
            return Ok(None);
        }
        rec.status = status;
        Ok(Some(rec.clone()))
    }

    async fn list_executions(&self, preset: PresetId) -> StoreResult<Vec<ExecutionRecord>> {
        let t = self.tables.read().await;
        Ok(t.executions
            .values()
            .filter(|r| r.preset == preset)
            .cloned()
            .collect())
    }

    async fn load_operation(&self, id: PresetId) -> StoreResult<Preset> {
        self.tables
            .read()
            .await
            .presets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("preset", id))
    }

    async fn load_group_members(&self, group: GroupId) -> StoreResult<Vec<Node>> {
        let t = self.tables.read().await;
        let g = t
            .groups
            .get(&group)
            .ok_or_else(|| StoreError::not_found("group", group))?;
        Ok(g.members
            .iter()
            .filter_map(|id| t.nodes.get(id).cloned())
            .collect())
    }

    async fn set_operation_running(&self, id: PresetId, running: bool) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let p = t
            .presets
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("preset", id))?;
        p.is_running = running;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_node_replaces_row_with_same_name() {
        let store = MemoryStore::new();
        let old = store
            .create_node(NewNode::declared("wall-a", "10.0.0.1"))
            .await
            .unwrap();
        let g = store.create_group("lobby").await.unwrap();
        store.add_member(g.id, old.id).await.unwrap();

        let new = store
            .create_node(NewNode::declared("wall-a", "10.0.0.2"))
            .await
            .unwrap();

        assert_ne!(old.id, new.id);
        assert!(store.get_node(old.id).await.unwrap().is_none());
        assert!(store.load_group_members(g.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_node_rejects_duplicate_address() {
        let store = MemoryStore::new();
        store
            .create_node(NewNode::declared("a", "10.0.0.1"))
            .await
            .unwrap();
        let err = store
            .create_node(NewNode::declared("b", "10.0.0.1"))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "store_conflict");
    }

    #[tokio::test]
    async fn test_rename_records_history_and_detects_collision() {
        let store = MemoryStore::new();
        let a = store
            .create_node(NewNode::declared("a", "10.0.0.1"))
            .await
            .unwrap();
        store
            .create_node(NewNode::declared("b", "10.0.0.2"))
            .await
            .unwrap();

        let renamed = store.rename_node(a.id, "lobby-left").await.unwrap();
        assert_eq!(renamed.name, "lobby-left");

        let history = store.name_history("10.0.0.1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous, "a");
        assert_eq!(history[0].current, "lobby-left");

        let err = store.rename_node(a.id, "b").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store.rename_node(a.id, "lobby-left").await.unwrap();
        assert_eq!(store.name_history("10.0.0.1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execution_narrowing_is_one_way() {
        let store = MemoryStore::new();
        let rec = store
            .append_execution_record(NewExecutionRecord {
                preset: PresetId(1),
                node: NodeId(2),
                status: ExecutionStatus::Executing,
                executed_at: Utc::now(),
            })
            .await
            .unwrap();

        let open = store
            .find_open_execution(NodeId(2), PresetId(1))
            .await
            .unwrap();
        assert_eq!(open.map(|r| r.id), Some(rec.id));

        let done = store
            .complete_execution(rec.id, NodeId(2), ExecutionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.map(|r| r.status), Some(ExecutionStatus::Completed));

        let again = store
            .complete_execution(rec.id, NodeId(2), ExecutionStatus::Crashed)
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(store
            .find_open_execution(NodeId(2), PresetId(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_execution_of_another_node_is_not_narrowed() {
        let store = MemoryStore::new();
        let rec = store
            .append_execution_record(NewExecutionRecord {
                preset: PresetId(1),
                node: NodeId(2),
                status: ExecutionStatus::Executing,
                executed_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = store
            .complete_execution(rec.id, NodeId(3), ExecutionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "execution", .. }));

        let recs = store.list_executions(PresetId(1)).await.unwrap();
        assert_eq!(recs[0].status, ExecutionStatus::Executing);
    }

    #[tokio::test]
    async fn test_catalog_validation() {
        let store = MemoryStore::new();
        let err = store
            .create_preset("show", GroupId(99), CommandMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "group", .. }));

        let g = store.create_group("lobby").await.unwrap();
        assert!(store.create_group("lobby").await.is_err());
        store
            .create_preset("show", g.id, CommandMap::new())
            .await
            .unwrap();
        assert!(store
            .create_preset("show", g.id, CommandMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes_but_serves_reads() {
        let store = MemoryStore::new();
        let n = store
            .create_node(NewNode::declared("a", "10.0.0.1"))
            .await
            .unwrap();
        store.set_unavailable(true);

        assert!(store
            .update_node_status(n.id, NodeStatus::Online)
            .await
            .is_err());
        assert!(store.get_node(n.id).await.unwrap().is_some());

        store.set_unavailable(false);
        let prev = store
            .update_node_status(n.id, NodeStatus::Online)
            .await
            .unwrap();
        assert_eq!(prev, NodeStatus::Offline);
    }
}
