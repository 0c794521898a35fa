//! # Persistent record store interface.
//!
//! The control plane never owns durable state; it reads and writes node, group,
//! preset and execution records through the [`Store`] trait. [`MemoryStore`] is the
//! bundled implementation used by the daemon and by tests.
//!
//! ## Rules
//! - Writes are short and never hold a lock across network I/O.
//! - Callers serialize read-modify-write sequences per node
//!   (see `KeyedLocks`); the store itself only guarantees
//!   that each call is atomic.
//! - A failed write is reported as [`StoreError`]; the caller decides whether it is
//!   surfaced (operator calls) or only logged (liveness transitions).

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    ExecutionId, ExecutionRecord, ExecutionStatus, GroupId, NameChange, NewExecutionRecord,
    NewNode, Node, NodeId, NodeStatus, Preset, PresetId,
};

/// Store result alias.
pub type StoreResult<T> = Result<T, StoreError>;

/// Contract for the record store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // === Nodes ===

    async fn find_node_by_address(&self, address: &str) -> StoreResult<Option<Node>>;

    async fn find_node_by_name(&self, name: &str) -> StoreResult<Option<Node>>;

    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>>;

    async fn list_nodes(&self) -> StoreResult<Vec<Node>>;

    /// Inserts a node.
    ///
    /// A pre-existing row holding the same name is deleted first. Fails with
    /// `Conflict` if another node already owns the address.
    async fn create_node(&self, node: NewNode) -> StoreResult<Node>;

    /// Changes a node's display name and records the change in the name history.
    ///
    /// Fails with `Conflict` if another node holds `name`. Renaming to the
    /// current name is a no-op.
    async fn rename_node(&self, id: NodeId, name: &str) -> StoreResult<Node>;

    /// Deletes a node and drops it from every group.
    async fn delete_node(&self, id: NodeId) -> StoreResult<Node>;

    /// Sets the status; returns the previous one.
    async fn update_node_status(&self, id: NodeId, status: NodeStatus) -> StoreResult<NodeStatus>;

    /// Sets `last_seen`.
    async fn touch_node(&self, id: NodeId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_active_operation(&self, id: NodeId, preset: Option<PresetId>) -> StoreResult<()>;

    async fn name_history(&self, address: &str) -> StoreResult<Vec<NameChange>>;

    // === Executions ===

    async fn append_execution_record(&self, rec: NewExecutionRecord) -> StoreResult<ExecutionRecord>;

    /// Newest `executing` record for the pair, if any.
    async fn find_open_execution(
        &self,
        node: NodeId,
        preset: PresetId,
    ) -> StoreResult<Option<ExecutionRecord>>;

    /// Narrows an open record of `node` to a terminal status.
    ///
    /// Returns `None` if the record is already terminal (the call is then a no-op).
    /// A record that belongs to another node is `NotFound`.
    async fn complete_execution(
        &self,
        id: ExecutionId,
        node: NodeId,
        status: ExecutionStatus,
    ) -> StoreResult<Option<ExecutionRecord>>;

    async fn list_executions(&self, preset: PresetId) -> StoreResult<Vec<ExecutionRecord>>;

    // === Presets and groups ===

    async fn load_operation(&self, id: PresetId) -> StoreResult<Preset>;

    /// Current members of a group, as full node records.
    async fn load_group_members(&self, group: GroupId) -> StoreResult<Vec<Node>>;

    /// Updates the best-effort `is_running` cache.
    async fn set_operation_running(&self, id: PresetId, running: bool) -> StoreResult<()>;
}
