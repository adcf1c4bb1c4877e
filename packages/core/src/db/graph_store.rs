//! GraphStore Trait - Graph Database Abstraction Layer
//!
//! This module defines the traits that abstract the property-graph database
//! behind the background operations. The traits let the same synchronization
//! logic run against a Bolt server (`BoltStore`) or the in-process
//! `MemoryGraph` without changing any operation code.
//!
//! # Architecture
//!
//! - **Reads are typed**: [`ReadQuery`] names one of the fixed, hand-authored
//!   statements (plus a guarded raw variant). Every backend returns the same
//!   record shape, keyed by the statement's `RETURN` aliases
//! - **Writes are transactional**: [`GraphTransaction`] exposes one method per
//!   write statement the engines issue; nothing is visible until `commit`
//! - **Error Handling**: Uses `anyhow::Result`; typed [`DatabaseError`] values
//!   travel inside
//!
//! [`DatabaseError`]: crate::db::DatabaseError

use crate::models::{PropertyMap, RelationshipSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One materialized result row
pub type Record = serde_json::Map<String, Value>;

/// Which nodes a snapshot read covers
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotScope {
    /// The single node with this name
    Named(String),
    /// Every node carrying at least one of these labels
    SharingLabels(Vec<String>),
    /// Every node in the graph
    All,
}

/// Read statements issued by the query executor
#[derive(Debug, Clone, PartialEq)]
pub enum ReadQuery {
    /// Node, its labels, all properties and incident relationships (one match)
    LoadNode { name: String },
    /// Names containing `fragment`, case-insensitive
    SearchNames { fragment: String, limit: usize },
    /// Traversal rows up to `depth + 1` hops in either direction
    NodeRelationships { name: String, depth: u32 },
    /// Primary label → names, for nodes with more than one label
    LabelHierarchy,
    /// Every non-null name, ascending
    AllNodeNames,
    /// Most recently modified node
    LastModified,
    /// Flattened nodes for suggestion statistics
    Snapshots(SnapshotScope),
    /// Caller-authored read statement
    Raw { statement: String, params: PropertyMap },
}

impl ReadQuery {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ReadQuery::LoadNode { .. } => "load_node",
            ReadQuery::SearchNames { .. } => "search_names",
            ReadQuery::NodeRelationships { .. } => "node_relationships",
            ReadQuery::LabelHierarchy => "label_hierarchy",
            ReadQuery::AllNodeNames => "all_node_names",
            ReadQuery::LastModified => "last_modified",
            ReadQuery::Snapshots(_) => "snapshots",
            ReadQuery::Raw { .. } => "raw",
        }
    }
}

/// System fields read back from an existing node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingNode {
    /// `_created` exactly as stored, if the node has one
    pub created: Option<Value>,
}

/// A connection handle to a property-graph database
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; each background task owns its own
/// handle, but the handle is used across await points.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Backend name for logs and errors
    fn backend(&self) -> &'static str;

    /// Liveness check on the handle
    async fn verify(&self) -> Result<()>;

    /// Run one read statement and materialize every row
    async fn read(&self, query: &ReadQuery) -> Result<Vec<Record>>;

    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>>;

    /// Release the handle's resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A single server-side write transaction
///
/// Each method corresponds to exactly one statement. Dropping a transaction
/// without calling [`commit`](GraphTransaction::commit) discards every change.
#[async_trait]
pub trait GraphTransaction: Send {
    /// `_created` of the node named `name`, or `None` if no such node exists
    async fn fetch_existing(&mut self, name: &str) -> Result<Option<ExistingNode>>;

    /// Create a bare node carrying the base label
    async fn create_node(&mut self, name: &str, description: &str, tags: &[String]) -> Result<()>;

    /// Replace the node's entire property map with `base`
    async fn reset_properties(&mut self, name: &str, base: &PropertyMap) -> Result<()>;

    /// Current labels, base marker excluded
    async fn current_labels(&mut self, name: &str) -> Result<BTreeSet<String>>;

    async fn add_labels(&mut self, name: &str, labels: &[String]) -> Result<()>;

    async fn remove_labels(&mut self, name: &str, labels: &[String]) -> Result<()>;

    /// Add or overwrite the given keys, leaving others untouched
    async fn merge_properties(&mut self, name: &str, properties: &PropertyMap) -> Result<()>;

    /// Delete every relationship incident to the node, returning how many
    async fn delete_relationships(&mut self, name: &str) -> Result<u64>;

    async fn node_exists(&mut self, name: &str) -> Result<bool>;

    /// Create a placeholder node for a missing relationship target
    async fn create_stub(&mut self, properties: &PropertyMap) -> Result<()>;

    /// Match-or-merge one edge and overwrite its properties
    ///
    /// Fails with `RelationshipTargetMissing` if the target does not exist.
    async fn merge_relationship(&mut self, name: &str, relationship: &RelationshipSpec)
        -> Result<()>;

    /// Delete the node and every relationship touching it; absent is a no-op
    async fn detach_delete(&mut self, name: &str) -> Result<()>;

    /// Rename the node and stamp `_modified`; returns whether a node matched
    async fn rename_node(&mut self, name: &str, new_name: &str, modified: &str) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Logical session bound to one connection handle
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn GraphStore>,
}

impl Session {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn read(&self, query: &ReadQuery) -> Result<Vec<Record>> {
        self.store.read(query).await
    }

    pub async fn begin(&self) -> Result<Box<dyn GraphTransaction>> {
        self.store.begin().await
    }
}
