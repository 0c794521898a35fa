//! Error types used by the switchboard control plane.
//!
//! This module defines the surfaced error and the collaborator-level errors it wraps:
//!
//! - [`Error`]: returned by operator-facing operations (dispatch, stop, delete, rename).
//! - [`StoreError`]: raised by a [`Store`](crate::store::Store) implementation.
//! - [`TransportError`]: raised when a frame cannot be handed to a live transport.
//! - [`ConfigError`]: raised while loading configuration.
//!
//! Every type provides `as_label` (stable snake_case label for logs and notifications).
//! Identity and binding races are resolved internally and never appear here.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::NodeId;

/// Result alias for surfaced control-plane operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// # Errors surfaced to the operator-facing layer.
///
/// `Unreachable` never aborts a dispatch; it is returned only by single-target
/// operations that require a live binding.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown node, group or preset.
    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },

    /// Uniqueness violation (duplicate name, rename collision).
    #[error("{entity} conflict: {key}")]
    Conflict {
        entity: &'static str,
        key: String,
    },

    /// Target node has no live binding.
    #[error("node {node} is not connected")]
    Unreachable { node: NodeId },

    /// Persistent store failure.
    #[error("store failure: {0}")]
    Store(#[source] StoreError),

    /// Transport failure.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Malformed inbound frame.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },
}

impl Error {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        Error::Conflict {
            entity,
            key: key.to_string(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/notifications.
    ///
    /// # Example
    /// ```
    /// use switchboard::Error;
    ///
    /// let err = Error::not_found("preset", 7);
    /// assert_eq!(err.as_label(), "not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Unreachable { .. } => "unreachable",
            Error::Store(_) => "store_failure",
            Error::Transport(_) => "transport_failure",
            Error::Protocol { .. } => "protocol_violation",
        }
    }

    /// True for errors the caller can fix by changing its request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::Conflict { .. } | Error::Protocol { .. }
        )
    }
}

impl From<StoreError> for Error {
    /// Lifts store-level lookups and uniqueness violations into their surfaced kinds.
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, key } => Error::NotFound { entity, key },
            StoreError::Conflict { entity, key } => Error::Conflict { entity, key },
            other => Error::Store(other),
        }
    }
}

/// # Errors produced by a [`Store`](crate::store::Store).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },

    #[error("{entity} conflict: {key}")]
    Conflict {
        entity: &'static str,
        key: String,
    },

    /// Backend unavailable or rejected the write.
    #[error("backend error: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        StoreError::Conflict {
            entity,
            key: key.to_string(),
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        StoreError::Backend {
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "store_not_found",
            StoreError::Conflict { .. } => "store_conflict",
            StoreError::Backend { .. } => "store_backend",
        }
    }
}

/// # Errors produced when handing a frame to a transport.
///
/// Sends never wait: a full queue is reported rather than awaited.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Peer closed, or the transport was evicted.
    #[error("transport closed")]
    Closed,

    /// Outbound queue is full.
    #[error("outbound queue full")]
    Full,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl TransportError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Closed => "transport_closed",
            TransportError::Full => "transport_full",
            TransportError::Io(_) => "transport_io",
            TransportError::Codec(_) => "transport_codec",
        }
    }
}

/// # Errors produced while loading [`Config`](crate::Config).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Environment override holds a value of the wrong shape.
    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Env { .. } => "config_env",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_lookup_errors_lift_to_surfaced_kinds() {
        let e: Error = StoreError::not_found("group", 3).into();
        assert!(matches!(e, Error::NotFound { entity: "group", .. }));

        let e: Error = StoreError::conflict("node", "wall-a").into();
        assert_eq!(e.as_label(), "conflict");
        assert!(e.is_client_error());

        let e: Error = StoreError::backend("disk full").into();
        assert_eq!(e.as_label(), "store_failure");
        assert!(!e.is_client_error());
    }

    #[test]
    fn test_messages_carry_keys() {
        let e = Error::not_found("preset", 42);
        assert_eq!(e.to_string(), "preset not found: 42");
        let e = Error::Unreachable { node: NodeId(5) };
        assert_eq!(e.to_string(), "node 5 is not connected");
    }
}
