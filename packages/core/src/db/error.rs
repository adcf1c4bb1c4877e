//! Database Error Types
//!
//! This module defines error types for graph database operations, providing
//! clear error handling for connection, transaction and statement failures.
//!
//! Store traits return `anyhow::Result`; these typed errors travel inside and
//! can be recovered with `downcast_ref::<DatabaseError>()`.

use thiserror::Error;

/// Graph database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a connection handle
    #[error("Failed to connect to graph database at {uri}: {reason}")]
    ConnectionFailed { uri: String, reason: String },

    /// Credentials were rejected; never retried
    #[error("Authentication failed for graph database at {uri}")]
    AuthenticationFailed { uri: String },

    /// Liveness check on an existing handle failed
    #[error("Connection verification failed: {0}")]
    VerificationFailed(String),

    /// A relationship target named in a save does not exist
    #[error("Relationship target {target:?} not found ({source_name} -[{rel_type}]- {target})")]
    RelationshipTargetMissing {
        source_name: String,
        rel_type: String,
        target: String,
    },

    /// A node the statement expects to exist is absent
    #[error("Node not found: {name}")]
    NodeNotFound { name: String },

    /// Rename target is already used by another node
    #[error("A node named {name:?} already exists")]
    NameTaken { name: String },

    /// Statement or query shape the backend cannot execute
    #[error("Unsupported by {backend} backend: {what}")]
    Unsupported { backend: &'static str, what: String },

    /// Driver-level failure
    #[cfg(feature = "bolt")]
    #[error("Graph driver error: {0}")]
    Driver(#[from] neo4rs::Error),

    /// Result row could not be decoded
    #[error("Failed to decode result row: {0}")]
    Decode(String),
}

impl DatabaseError {
    pub fn connection_failed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn relationship_target_missing(
        source_name: impl Into<String>,
        rel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::RelationshipTargetMissing {
            source_name: source_name.into(),
            rel_type: rel_type.into(),
            target: target.into(),
        }
    }

    pub fn node_not_found(name: impl Into<String>) -> Self {
        Self::NodeNotFound { name: name.into() }
    }

    pub fn name_taken(name: impl Into<String>) -> Self {
        Self::NameTaken { name: name.into() }
    }

    pub fn unsupported(backend: &'static str, what: impl Into<String>) -> Self {
        Self::Unsupported {
            backend,
            what: what.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether a reconnect attempt is pointless for this failure
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}
