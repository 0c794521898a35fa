//! # Identity resolution.
//!
//! Maps a claimed `(name, address)` pair to a durable node identity. The address
//! is the key; the claimed name is only used when a node has to be created.
//!
//! ## Rules
//! - Addresses are normalized first (`::ffff:a.b.c.d` → `a.b.c.d`, `::1` → `127.0.0.1`).
//! - Resolution for one address is serialized by an address-scoped lock, so
//!   concurrent first contacts from the same address yield a single node.
//! - A create that loses a race against another writer (address conflict) is
//!   resolved by re-reading the winner, never surfaced.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{NewNode, NodeId};
use crate::store::Store;
use crate::sync::KeyedLocks;

/// Canonical form of a peer address.
///
/// ```
/// use switchboard::identity::normalize_address;
///
/// assert_eq!(normalize_address("::ffff:10.0.0.7"), "10.0.0.7");
/// assert_eq!(normalize_address("::1"), "127.0.0.1");
/// assert_eq!(normalize_address(" 10.0.0.8 "), "10.0.0.8");
/// ```
pub fn normalize_address(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(v4) = raw.strip_prefix("::ffff:") {
        return v4.to_string();
    }
    if raw == "::1" {
        return "127.0.0.1".to_string();
    }
    raw.to_string()
}

/// Outcome of [`IdentityResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: NodeId,
    /// Current display name (the stored one, not necessarily the claimed one).
    pub name: String,
    pub address: String,
    /// True if this call created the node.
    pub created: bool,
    /// Node that held the claimed name and was deleted to make room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced: Option<NodeId>,
}

/// Address-keyed find-or-create over the [`Store`].
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    bus: Bus,
    locks: KeyedLocks<String>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>, bus: Bus) -> Self {
        Self {
            store,
            bus,
            locks: KeyedLocks::new(),
        }
    }

    /// Resolves the identity for `address`, creating an `online` node named
    /// `claimed_name` if none exists.
    pub async fn resolve(
        &self,
        claimed_name: &str,
        address: &str,
    ) -> Result<NodeIdentity, StoreError> {
        let address = normalize_address(address);
        let guard = self.locks.lock(&address).await;
        let resolved = self.resolve_locked(claimed_name, address.clone()).await;
        drop(guard);
        self.locks.release(&address);
        resolved
    }

    async fn resolve_locked(
        &self,
        claimed_name: &str,
        address: String,
    ) -> Result<NodeIdentity, StoreError> {
        if let Some(node) = self.store.find_node_by_address(&address).await? {
            debug!(node = %node.id, %address, "identity resolved");
            return Ok(NodeIdentity {
                id: node.id,
                name: node.name,
                address,
                created: false,
                replaced: None,
            });
        }

        // A node under the claimed name elsewhere loses it; the store deletes that row.
        let replaced = self
            .store
            .find_node_by_name(claimed_name)
            .await?
            .map(|n| n.id);
        let new = NewNode::registered(claimed_name, address.clone(), Utc::now());
        match self.store.create_node(new).await {
            Ok(node) => {
                info!(
                    node = %node.id,
                    name = %node.name,
                    %address,
                    replaced = ?replaced,
                    "node created on registration"
                );
                self.bus.publish(
                    Event::new(EventKind::NodeRegistered)
                        .with_node(node.id)
                        .with_reason(node.name.as_str()),
                );
                Ok(NodeIdentity {
                    id: node.id,
                    name: node.name,
                    address,
                    created: true,
                    replaced,
                })
            }
            Err(StoreError::Conflict { .. }) => {
                let node = self
                    .store
                    .find_node_by_address(&address)
                    .await?
                    .ok_or_else(|| StoreError::not_found("node", &address))?;
                Ok(NodeIdentity {
                    id: node.id,
                    name: node.name,
                    address,
                    created: false,
                    replaced: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Number of address locks currently retained.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
