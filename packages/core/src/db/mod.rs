//! Database Layer
//!
//! This module handles all property-graph database interactions:
//!
//! - Connection management with verify-and-reconnect
//! - The `GraphStore` / `GraphTransaction` abstraction every operation runs on
//! - The hand-authored Cypher statement catalogue
//! - Two backends: Bolt (Neo4j, feature `bolt`) and the in-process `MemoryGraph`
//!
//! # Architecture
//!
//! Operations never build statement text themselves. Reads name a
//! [`ReadQuery`]; writes call one [`GraphTransaction`] method per statement.
//! Both backends return identical record shapes, so the same engine code and
//! the same tests run against either.

#[cfg(feature = "bolt")]
mod bolt_store;
mod connection;
pub mod cypher;
mod error;
mod graph_store;
mod memory_store;

#[cfg(feature = "bolt")]
pub use bolt_store::{BoltConnector, BoltStore};
pub use connection::{ConnectionManager, Connector};
pub use error::DatabaseError;
pub use graph_store::{
    ExistingNode, GraphStore, GraphTransaction, ReadQuery, Record, Session, SnapshotScope,
};
pub use memory_store::{MemoryGraph, MemoryNode, MemoryRelationship};
