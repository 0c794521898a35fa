//! # Session: one transport's view of the control plane.
//!
//! A [`Session`] is created per accepted connection and fed every decoded [`Inbound`]
//! frame in arrival order. It owns the link between the transport and the node it
//! registered as.
//!
//! ## Rules
//! - `register` resolves the identity (claimed address, else peer address) and binds
//!   this transport, evicting any older transport of the same node.
//! - `heartbeat` on a session that never registered is resolved by address: a known
//!   address binds, an unknown one gets `register_required`.
//! - A registration that takes a name from a node at another address deletes that
//!   node, so its transport is evicted.
//! - `ping` and `client_status_request` are answered with or without registration.
//! - Every other frame requires a registered session, otherwise `register_required`.
//! - [`Session::finish`] unbinds only if this transport is still the bound one, which
//!   arms the reconnection grace deadline.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identity::normalize_address;
use crate::model::NodeId;
use crate::plane::ControlPlane;
use crate::protocol::{Inbound, Outbound, ServerState};
use crate::registry::TransportRef;

/// Per-connection frame handler.
pub struct Session {
    plane: Arc<ControlPlane>,
    transport: TransportRef,
    peer: String,
    node: Option<NodeId>,
}

impl Session {
    pub(crate) fn new(plane: Arc<ControlPlane>, transport: TransportRef, peer: String) -> Self {
        Self {
            plane,
            transport,
            peer: normalize_address(&peer),
            node: None,
        }
    }

    /// Node this session is registered as, if any.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Handles one inbound frame.
    ///
    /// Errors are per-frame: the caller logs them and keeps the session open.
    pub async fn handle(&mut self, frame: Inbound) -> Result<()> {
        debug!(peer = %self.peer, frame = frame.as_label(), "inbound");
        match frame {
            Inbound::Register { name, address } => self.register(&name, address).await,
            Inbound::Heartbeat { address, .. } => self.heartbeat(address).await,
            Inbound::Ping {} => {
                if let Some(node) = self.node {
                    self.plane.registry().touch(node, self.transport.id());
                }
                self.reply(Outbound::Pong { at: Utc::now() });
                Ok(())
            }
            Inbound::StatusRequest { name } => {
                self.status(name).await;
                Ok(())
            }
            other => {
                let Some(node) = self.node else {
                    self.reply(Outbound::RegisterRequired {
                        reason: format!("{} before register", other.as_label()),
                    });
                    return Ok(());
                };
                self.plane.registry().touch(node, self.transport.id());
                let liveness = self.plane.liveness();
                match other {
                    Inbound::ProcessStatus { running, crashed } => {
                        liveness.on_process_status(node, running, crashed).await?
                    }
                    Inbound::ExecutionResult {
                        execution_id,
                        status,
                    } => {
                        liveness
                            .on_execution_result(node, execution_id, status)
                            .await?
                    }
                    Inbound::StopResult { .. } => liveness.on_stop_result(node).await?,
                    Inbound::ConnectionCheckResponse {} => {
                        liveness.on_connection_check_response(node).await?
                    }
                    Inbound::Register { .. }
                    | Inbound::Heartbeat { .. }
                    | Inbound::Ping {}
                    | Inbound::StatusRequest { .. } => {}
                }
                Ok(())
            }
        }
    }

    async fn register(&mut self, name: &str, address: Option<String>) -> Result<()> {
        let address = claimed_or(address, &self.peer);
        let identity = match self.plane.identity().resolve(name, &address).await {
            Ok(id) => id,
            Err(e) => {
                warn!(peer = %self.peer, %address, err = %e, "registration failed");
                self.reply(Outbound::RegistrationFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        // This session's own node is unbound below instead.
        if let Some(old) = identity.replaced.filter(|old| Some(*old) != self.node) {
            if self.plane.registry().evict(old) {
                info!(node = %old, name = %identity.name, "node replaced by registration elsewhere");
            }
        }
        if let Some(prev) = self.node.filter(|prev| *prev != identity.id) {
            self.plane.registry().unbind(prev, self.transport.id());
        }
        self.node = Some(identity.id);
        info!(
            node = %identity.id,
            name = %identity.name,
            address = %identity.address,
            created = identity.created,
            "node registered"
        );

        self.plane
            .liveness()
            .attach(identity.id, self.transport.clone(), "register")
            .await?;
        self.reply(Outbound::RegistrationAck {
            node_id: identity.id,
            name: identity.name,
            heartbeat_interval_secs: self.plane.config().heartbeat_interval_hint.as_secs(),
        });
        Ok(())
    }

    async fn heartbeat(&mut self, address: Option<String>) -> Result<()> {
        match self.node {
            Some(node) => {
                self.plane.registry().touch(node, self.transport.id());
                self.plane.liveness().record_heartbeat(node).await?;
            }
            None => {
                let address = claimed_or(address, &self.peer);
                let Some(found) = self.plane.store().find_node_by_address(&address).await? else {
                    self.reply(Outbound::RegisterRequired {
                        reason: format!("unknown address {address}"),
                    });
                    return Ok(());
                };
                self.node = Some(found.id);
                info!(node = %found.id, %address, "bound by heartbeat");
                self.plane
                    .liveness()
                    .attach(found.id, self.transport.clone(), "heartbeat")
                    .await?;
            }
        }

        self.reply(Outbound::HeartbeatAck {
            next_heartbeat_secs: self.plane.config().heartbeat_interval_hint.as_secs(),
        });
        Ok(())
    }

    async fn status(&self, name: Option<String>) {
        let lookup = match (self.node, name) {
            (Some(node), _) => self.plane.store().get_node(node).await,
            (None, Some(name)) => self.plane.store().find_node_by_name(&name).await,
            (None, None) => Ok(None),
        };
        let (server_status, node_status) = match lookup {
            Ok(node) => (ServerState::Online, node.map(|n| n.status)),
            Err(e) => {
                warn!(peer = %self.peer, err = %e, "status lookup failed");
                (ServerState::Error, None)
            }
        };
        self.reply(Outbound::ServerStatusResponse {
            server_status,
            node_status,
            uptime_secs: self.plane.uptime().as_secs(),
            at: Utc::now(),
        });
    }

    /// Tells the peer the plane is shutting down and when to reconnect.
    pub fn announce_shutdown(&self) {
        self.reply(Outbound::ServerShutdown {
            reconnect_after_secs: self.plane.config().reconnect_grace_clamped().as_secs(),
            at: Utc::now(),
        });
    }

    /// Ends the session: unbinds if still current, then closes the transport.
    pub fn finish(self) {
        if let Some(node) = self.node {
            if self.plane.registry().unbind(node, self.transport.id()) {
                info!(%node, peer = %self.peer, "session closed; grace armed");
            } else {
                debug!(%node, peer = %self.peer, "stale session closed");
            }
        }
        self.transport.close();
    }

    fn reply(&self, frame: Outbound) {
        let label = frame.as_label();
        if let Err(e) = self.transport.send(frame) {
            debug!(peer = %self.peer, frame = label, err = %e, "reply dropped");
        }
    }
}

fn claimed_or(claimed: Option<String>, peer: &str) -> String {
    match claimed {
        Some(a) if !a.trim().is_empty() => normalize_address(&a),
        _ => peer.to_string(),
    }
}
