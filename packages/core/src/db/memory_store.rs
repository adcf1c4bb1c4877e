//! MemoryGraph - In-Process GraphStore Backend
//!
//! This module implements [`GraphStore`] and [`Connector`] over an in-memory
//! property graph, for tests, benchmarks and offline use.
//!
//! # Architecture
//!
//! - **Same record shapes**: every [`ReadQuery`] returns the rows the Bolt
//!   backend returns, keyed by the same aliases
//! - **Write transactions**: `begin` takes an owned lock on the graph and works
//!   on a copy; `commit` writes the copy back, dropping or rolling back discards
//!   it. Write transactions are therefore serialized
//! - **Test hooks**: per-statement latency, injected verification and connect
//!   failures, and counters for connects and closes
//!
//! Raw statements are answered only when their text, whitespace aside, is the
//! catalogue text of a parameterless read (all names, last modified); any
//! other raw statement is rejected with [`DatabaseError::Unsupported`].
//!
//! # Examples
//!
//! ```rust
//! use worldgraph_core::db::{Connector, MemoryGraph};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let graph = MemoryGraph::new();
//! let store = graph.connect().await?;
//! store.verify().await?;
//! assert_eq!(graph.connect_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::db::connection::Connector;
use crate::db::cypher;
use crate::db::error::DatabaseError;
use crate::db::graph_store::{
    ExistingNode, GraphStore, GraphTransaction, ReadQuery, Record, SnapshotScope,
};
use crate::models::{
    Direction, PropertyMap, RelationshipSpec, BASE_LABEL, CREATED_KEY, MODIFIED_KEY, STUB_LABEL,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

const BACKEND: &str = "memory";

/// A stored node as seen by test assertions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryNode {
    pub labels: BTreeSet<String>,
    pub properties: PropertyMap,
}

impl MemoryNode {
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }
}

/// A stored relationship with endpoints resolved to names
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRelationship {
    pub rel_type: String,
    pub start_name: Option<String>,
    pub end_name: Option<String>,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    rel_type: String,
    start: u64,
    end: u64,
    properties: PropertyMap,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    nodes: BTreeMap<u64, MemoryNode>,
    edges: BTreeMap<u64, StoredEdge>,
    next_id: u64,
}

impl GraphData {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_node(&mut self, labels: BTreeSet<String>, properties: PropertyMap) -> u64 {
        let id = self.allocate();
        self.nodes.insert(
            id,
            MemoryNode {
                labels,
                properties: strip_nulls(properties),
            },
        );
        id
    }

    fn ids_named(&self, name: &str) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.name() == Some(name))
            .map(|(id, _)| *id)
            .collect()
    }

    fn name_of(&self, id: u64) -> Value {
        self.nodes
            .get(&id)
            .and_then(|node| node.properties.get("name"))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn labels_of(&self, id: u64) -> Value {
        self.nodes
            .get(&id)
            .map(|node| labels_value(&node.labels))
            .unwrap_or(Value::Null)
    }

    fn incident(&self, id: u64) -> impl Iterator<Item = (&u64, &StoredEdge)> {
        self.edges
            .iter()
            .filter(move |(_, edge)| edge.start == id || edge.end == id)
    }

    /// `[(n)-[r]->(m) | ...] + [(n)<-[r]-(o) | ...]`; self-loops appear in both
    fn relationship_list(&self, id: u64, keys: [&str; 4]) -> Value {
        let [type_key, end_key, dir_key, props_key] = keys;
        let outgoing = self
            .edges
            .values()
            .filter(|edge| edge.start == id)
            .map(|edge| (edge, edge.end, Direction::Outgoing));
        let incoming = self
            .edges
            .values()
            .filter(|edge| edge.end == id)
            .map(|edge| (edge, edge.start, Direction::Incoming));

        Value::Array(
            outgoing
                .chain(incoming)
                .map(|(edge, other, direction)| {
                    Value::Object(record([
                        (type_key, Value::from(edge.rel_type.clone())),
                        (end_key, self.name_of(other)),
                        (dir_key, Value::from(direction.marker())),
                        (props_key, Value::Object(edge.properties.clone())),
                    ]))
                })
                .collect(),
        )
    }
}

struct MemoryState {
    data: Arc<Mutex<GraphData>>,
    latency_micros: AtomicU64,
    verify_failures: AtomicUsize,
    connect_failures: AtomicUsize,
    reject_credentials: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// In-process property graph
///
/// Cloning is cheap; every clone shares the same graph and counters.
#[derive(Clone)]
pub struct MemoryGraph {
    state: Arc<MemoryState>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                data: Arc::new(Mutex::new(GraphData::default())),
                latency_micros: AtomicU64::new(0),
                verify_failures: AtomicUsize::new(0),
                connect_failures: AtomicUsize::new(0),
                reject_credentials: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay applied before every statement, inside and outside transactions
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_micros
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::from_micros(self.state.latency_micros.load(Ordering::SeqCst))
    }

    /// Make the next `count` liveness checks fail
    pub fn fail_next_verifications(&self, count: usize) {
        self.state.verify_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Make every connect attempt fail with an authentication error
    pub fn reject_credentials(&self, reject: bool) {
        self.state.reject_credentials.store(reject, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Insert a node directly, bypassing transactions
    pub async fn insert_node<I, S>(&self, labels: I, properties: PropertyMap)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = labels.into_iter().map(Into::into).collect();
        self.state.data.lock().await.insert_node(labels, properties);
    }

    /// First node with this name
    pub async fn node(&self, name: &str) -> Option<MemoryNode> {
        let data = self.state.data.lock().await;
        data.nodes
            .values()
            .find(|node| node.name() == Some(name))
            .cloned()
    }

    /// Every relationship touching a node with this name
    pub async fn relationships_of(&self, name: &str) -> Vec<MemoryRelationship> {
        let data = self.state.data.lock().await;
        let ids: HashSet<u64> = data.ids_named(name).into_iter().collect();
        data.edges
            .values()
            .filter(|edge| ids.contains(&edge.start) || ids.contains(&edge.end))
            .map(|edge| MemoryRelationship {
                rel_type: edge.rel_type.clone(),
                start_name: data.name_of(edge.start).as_str().map(str::to_string),
                end_name: data.name_of(edge.end).as_str().map(str::to_string),
                properties: edge.properties.clone(),
            })
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.state.data.lock().await.nodes.len()
    }

    pub async fn relationship_count(&self) -> usize {
        self.state.data.lock().await.edges.len()
    }

    async fn pause(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl Connector for MemoryGraph {
    fn target(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn GraphStore>> {
        if self.state.reject_credentials.load(Ordering::SeqCst) {
            return Err(DatabaseError::AuthenticationFailed {
                uri: self.target(),
            }
            .into());
        }
        if Self::take_failure(&self.state.connect_failures) {
            return Err(DatabaseError::connection_failed(self.target(), "injected connect failure").into());
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened in-memory graph handle");
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn verify(&self) -> Result<()> {
        if Self::take_failure(&self.state.verify_failures) {
            return Err(DatabaseError::VerificationFailed("injected verification failure".into()).into());
        }
        Ok(())
    }

    async fn read(&self, query: &ReadQuery) -> Result<Vec<Record>> {
        self.pause().await;
        let data = self.state.data.lock().await;
        match query {
            ReadQuery::LoadNode { name } => Ok(load_node(&data, name)),
            ReadQuery::SearchNames { fragment, limit } => Ok(search_names(&data, fragment, *limit)),
            ReadQuery::NodeRelationships { name, depth } => {
                if *depth < 1 {
                    return Err(crate::models::ValidationError::InvalidDepth(*depth).into());
                }
                Ok(traverse(&data, name, *depth + 1))
            }
            ReadQuery::LabelHierarchy => Ok(label_hierarchy(&data)),
            ReadQuery::AllNodeNames => Ok(all_names(&data)),
            ReadQuery::LastModified => Ok(last_modified(&data)),
            ReadQuery::Snapshots(scope) => Ok(snapshots(&data, scope)),
            ReadQuery::Raw { statement, .. } => match catalogue_read(statement) {
                Some(ReadQuery::AllNodeNames) => Ok(all_names(&data)),
                Some(ReadQuery::LastModified) => Ok(last_modified(&data)),
                _ => Err(DatabaseError::unsupported(BACKEND, "raw statements").into()),
            },
        }
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>> {
        let guard = self.state.data.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            graph: self.clone(),
            guard,
            working,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Write transaction over a private copy of the graph
struct MemoryTransaction {
    graph: MemoryGraph,
    guard: OwnedMutexGuard<GraphData>,
    working: GraphData,
}

#[async_trait]
impl GraphTransaction for MemoryTransaction {
    async fn fetch_existing(&mut self, name: &str) -> Result<Option<ExistingNode>> {
        self.graph.pause().await;
        Ok(self
            .working
            .nodes
            .values()
            .find(|node| node.name() == Some(name))
            .map(|node| ExistingNode {
                created: node
                    .properties
                    .get(CREATED_KEY)
                    .filter(|value| !value.is_null())
                    .cloned(),
            }))
    }

    async fn create_node(&mut self, name: &str, description: &str, tags: &[String]) -> Result<()> {
        self.graph.pause().await;
        let properties = record([
            ("name", Value::from(name)),
            ("description", Value::from(description)),
            ("tags", Value::from(tags.to_vec())),
        ]);
        self.working
            .insert_node(BTreeSet::from([BASE_LABEL.to_string()]), properties);
        Ok(())
    }

    async fn reset_properties(&mut self, name: &str, base: &PropertyMap) -> Result<()> {
        self.graph.pause().await;
        for id in self.working.ids_named(name) {
            if let Some(node) = self.working.nodes.get_mut(&id) {
                node.properties = strip_nulls(base.clone());
            }
        }
        Ok(())
    }

    async fn current_labels(&mut self, name: &str) -> Result<BTreeSet<String>> {
        self.graph.pause().await;
        Ok(self
            .working
            .nodes
            .values()
            .find(|node| node.name() == Some(name))
            .map(|node| {
                node.labels
                    .iter()
                    .filter(|label| label.as_str() != BASE_LABEL)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_labels(&mut self, name: &str, labels: &[String]) -> Result<()> {
        self.graph.pause().await;
        for id in self.working.ids_named(name) {
            if let Some(node) = self.working.nodes.get_mut(&id) {
                node.labels.extend(labels.iter().cloned());
            }
        }
        Ok(())
    }

    async fn remove_labels(&mut self, name: &str, labels: &[String]) -> Result<()> {
        self.graph.pause().await;
        for id in self.working.ids_named(name) {
            if let Some(node) = self.working.nodes.get_mut(&id) {
                for label in labels {
                    node.labels.remove(label);
                }
            }
        }
        Ok(())
    }

    async fn merge_properties(&mut self, name: &str, properties: &PropertyMap) -> Result<()> {
        self.graph.pause().await;
        for id in self.working.ids_named(name) {
            if let Some(node) = self.working.nodes.get_mut(&id) {
                for (key, value) in properties {
                    if value.is_null() {
                        node.properties.remove(key);
                    } else {
                        node.properties.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete_relationships(&mut self, name: &str) -> Result<u64> {
        self.graph.pause().await;
        let ids: HashSet<u64> = self.working.ids_named(name).into_iter().collect();
        let before = self.working.edges.len();
        self.working
            .edges
            .retain(|_, edge| !ids.contains(&edge.start) && !ids.contains(&edge.end));
        Ok((before - self.working.edges.len()) as u64)
    }

    async fn node_exists(&mut self, name: &str) -> Result<bool> {
        self.graph.pause().await;
        Ok(!self.working.ids_named(name).is_empty())
    }

    async fn create_stub(&mut self, properties: &PropertyMap) -> Result<()> {
        self.graph.pause().await;
        let labels = BTreeSet::from([BASE_LABEL.to_string(), STUB_LABEL.to_string()]);
        self.working.insert_node(labels, properties.clone());
        Ok(())
    }

    async fn merge_relationship(
        &mut self,
        name: &str,
        relationship: &RelationshipSpec,
    ) -> Result<()> {
        self.graph.pause().await;
        let sources = self.working.ids_named(name);
        let targets = self.working.ids_named(&relationship.target_name);
        if sources.is_empty() || targets.is_empty() {
            return Err(DatabaseError::relationship_target_missing(
                name,
                &relationship.rel_type,
                &relationship.target_name,
            )
            .into());
        }

        let properties = strip_nulls(relationship.properties.clone());
        for &source in &sources {
            for &target in &targets {
                let (start, end) = match relationship.direction {
                    Direction::Outgoing => (source, target),
                    Direction::Incoming => (target, source),
                };
                let existing = self.working.edges.values_mut().find(|edge| {
                    edge.start == start && edge.end == end && edge.rel_type == relationship.rel_type
                });
                match existing {
                    Some(edge) => edge.properties = properties.clone(),
                    None => {
                        let id = self.working.allocate();
                        self.working.edges.insert(
                            id,
                            StoredEdge {
                                rel_type: relationship.rel_type.clone(),
                                start,
                                end,
                                properties: properties.clone(),
                            },
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn detach_delete(&mut self, name: &str) -> Result<()> {
        self.graph.pause().await;
        let ids: HashSet<u64> = self.working.ids_named(name).into_iter().collect();
        self.working
            .edges
            .retain(|_, edge| !ids.contains(&edge.start) && !ids.contains(&edge.end));
        self.working.nodes.retain(|id, _| !ids.contains(id));
        Ok(())
    }

    async fn rename_node(&mut self, name: &str, new_name: &str, modified: &str) -> Result<bool> {
        self.graph.pause().await;
        let ids = self.working.ids_named(name);
        for id in &ids {
            if let Some(node) = self.working.nodes.get_mut(id) {
                node.properties.insert("name".into(), Value::from(new_name));
                node.properties.insert(MODIFIED_KEY.into(), Value::from(modified));
            }
        }
        Ok(!ids.is_empty())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.graph.pause().await;
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn record<const N: usize>(fields: [(&str, Value); N]) -> Record {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn labels_value(labels: &BTreeSet<String>) -> Value {
    Value::from(labels.iter().cloned().collect::<Vec<_>>())
}

/// `SET n = $map` drops null-valued keys
fn strip_nulls(properties: PropertyMap) -> PropertyMap {
    properties
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

/// Parameterless catalogue read whose statement text matches `statement`
fn catalogue_read(statement: &str) -> Option<ReadQuery> {
    let wanted = squash_whitespace(statement);
    [ReadQuery::AllNodeNames, ReadQuery::LastModified]
        .into_iter()
        .find(|query| {
            cypher::read_statement(query)
                .map(|rendered| squash_whitespace(&rendered.text) == wanted)
                .unwrap_or(false)
        })
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn load_node(data: &GraphData, name: &str) -> Vec<Record> {
    let Some((&id, node)) = data.nodes.iter().find(|(_, node)| node.name() == Some(name)) else {
        return Vec::new();
    };
    vec![record([
        ("name", data.name_of(id)),
        (
            "relationships",
            data.relationship_list(id, ["type", "end", "dir", "props"]),
        ),
        ("labels", labels_value(&node.labels)),
        ("all_props", Value::Object(node.properties.clone())),
    ])]
}

fn search_names(data: &GraphData, fragment: &str, limit: usize) -> Vec<Record> {
    let needle = fragment.to_lowercase();
    let mut names: Vec<&str> = data
        .nodes
        .values()
        .filter_map(MemoryNode::name)
        .filter(|name| name.to_lowercase().contains(&needle))
        .collect();
    names.sort_unstable();
    names
        .into_iter()
        .take(limit)
        .map(|name| record([("name", Value::from(name))]))
        .collect()
}

/// Undirected paths of 1..=max_hops relationships from the named node, never
/// reusing a relationship within one path; one row per (node, incoming edge)
/// step, deduplicated and ordered by depth
fn traverse(data: &GraphData, name: &str, max_hops: u32) -> Vec<Record> {
    type Row = (Value, Value, Value, String, &'static str, u32);

    fn walk(
        data: &GraphData,
        current: u64,
        depth: u32,
        max_hops: u32,
        used: &mut Vec<u64>,
        seen: &mut HashSet<String>,
        rows: &mut Vec<Row>,
    ) {
        if depth > max_hops {
            return;
        }
        let steps: Vec<(u64, StoredEdge)> = data
            .incident(current)
            .filter(|(id, _)| !used.contains(id))
            .map(|(id, edge)| (*id, edge.clone()))
            .collect();
        for (edge_id, edge) in steps {
            let next = if edge.start == current { edge.end } else { edge.start };
            let direction = if edge.start == current {
                Direction::Outgoing
            } else {
                Direction::Incoming
            };
            let row: Row = (
                data.name_of(next),
                data.labels_of(next),
                data.name_of(current),
                edge.rel_type.clone(),
                direction.marker(),
                depth,
            );
            let key = format!("{}|{}|{}|{}|{}|{}", row.0, row.1, row.2, row.3, row.4, row.5);
            if seen.insert(key) {
                rows.push(row);
            }
            used.push(edge_id);
            walk(data, next, depth + 1, max_hops, used, seen, rows);
            used.pop();
        }
    }

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for start in data.ids_named(name) {
        walk(data, start, 1, max_hops, &mut Vec::new(), &mut seen, &mut rows);
    }
    rows.sort_by_key(|row| row.5);

    rows.into_iter()
        .map(|(node_name, labels, parent_name, rel_type, direction, depth)| {
            record([
                ("node_name", node_name),
                ("labels", labels),
                ("parent_name", parent_name),
                ("rel_type", Value::from(rel_type)),
                ("direction", Value::from(direction)),
                ("depth", Value::from(depth)),
            ])
        })
        .collect()
}

fn label_hierarchy(data: &GraphData) -> Vec<Record> {
    let mut categories: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for node in data.nodes.values().filter(|node| node.labels.len() > 1) {
        let category = node.labels.iter().find(|label| label.as_str() != BASE_LABEL);
        if let Some(category) = category {
            categories
                .entry(category.clone())
                .or_default()
                .push(node.properties.get("name").cloned().unwrap_or(Value::Null));
        }
    }
    categories
        .into_iter()
        .map(|(category, nodes)| {
            record([("category", Value::from(category)), ("nodes", Value::Array(nodes))])
        })
        .collect()
}

fn all_names(data: &GraphData) -> Vec<Record> {
    let mut names: Vec<&str> = data.nodes.values().filter_map(MemoryNode::name).collect();
    names.sort_unstable();
    names
        .into_iter()
        .map(|name| record([("name", Value::from(name))]))
        .collect()
}

fn last_modified(data: &GraphData) -> Vec<Record> {
    data.nodes
        .values()
        .filter_map(|node| {
            let modified = node.properties.get(MODIFIED_KEY)?.as_str()?;
            Some((modified, node))
        })
        .max_by(|a, b| a.0.cmp(b.0))
        .map(|(modified, node)| {
            vec![record([
                ("name", node.properties.get("name").cloned().unwrap_or(Value::Null)),
                ("modified", Value::from(modified)),
            ])]
        })
        .unwrap_or_default()
}

fn snapshots(data: &GraphData, scope: &SnapshotScope) -> Vec<Record> {
    data.nodes
        .iter()
        .filter(|(_, node)| match scope {
            SnapshotScope::Named(name) => node.name() == Some(name.as_str()),
            SnapshotScope::SharingLabels(labels) => {
                labels.iter().any(|label| node.labels.contains(label))
            }
            SnapshotScope::All => node.name().is_some(),
        })
        .map(|(&id, node)| {
            record([
                ("name", data.name_of(id)),
                ("tags", node.properties.get("tags").cloned().unwrap_or(Value::Null)),
                ("labels", labels_value(&node.labels)),
                ("properties", Value::Object(node.properties.clone())),
                (
                    "relationships",
                    data.relationship_list(id, ["relationship", "target", "direction", "properties"]),
                ),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{names_from_records, RelationshipRow};
    use serde_json::json;

    fn props(value: Value) -> PropertyMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    async fn seeded() -> Result<MemoryGraph> {
        let graph = MemoryGraph::new();
        let store = graph.connect().await?;
        let mut tx = store.begin().await?;
        for name in ["Castle", "Throne Room", "Crown"] {
            tx.create_node(name, "", &[]).await?;
        }
        tx.merge_relationship(
            "Castle",
            &RelationshipSpec::new("CONTAINS", "Throne Room", Direction::Outgoing),
        )
        .await?;
        tx.merge_relationship(
            "Throne Room",
            &RelationshipSpec::new("HOLDS", "Crown", Direction::Outgoing),
        )
        .await?;
        tx.commit().await?;
        Ok(graph)
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() -> Result<()> {
        let graph = MemoryGraph::new();
        let store = graph.connect().await?;

        let mut tx = store.begin().await?;
        tx.create_node("Castle", "", &[]).await?;
        drop(tx);
        assert_eq!(graph.node_count().await, 0);

        let mut tx = store.begin().await?;
        tx.create_node("Castle", "", &[]).await?;
        tx.rollback().await?;
        assert_eq!(graph.node_count().await, 0);

        let mut tx = store.begin().await?;
        tx.create_node("Castle", "", &[]).await?;
        tx.commit().await?;
        assert_eq!(graph.node_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_relationship_requires_target() -> Result<()> {
        let graph = seeded().await?;
        let store = graph.connect().await?;
        let mut tx = store.begin().await?;
        let err = tx
            .merge_relationship(
                "Castle",
                &RelationshipSpec::new("NEAR", "Nowhere", Direction::Outgoing),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::RelationshipTargetMissing { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_relationship_overwrites_properties() -> Result<()> {
        let graph = seeded().await?;
        let store = graph.connect().await?;
        let mut tx = store.begin().await?;
        let spec = RelationshipSpec::new("CONTAINS", "Throne Room", Direction::Outgoing)
            .with_property("since", 1200);
        tx.merge_relationship("Castle", &spec).await?;
        tx.commit().await?;

        assert_eq!(graph.relationship_count().await, 2);
        let rels = graph.relationships_of("Castle").await;
        assert_eq!(rels[0].properties, props(json!({"since": 1200})));
        Ok(())
    }

    #[tokio::test]
    async fn test_traversal_rows_follow_depth_plus_one_hops() -> Result<()> {
        let graph = seeded().await?;

        let rows = RelationshipRow::from_records(
            graph
                .read(&ReadQuery::NodeRelationships {
                    name: "Castle".into(),
                    depth: 1,
                })
                .await?,
        )?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].node_name, "Throne Room");
        assert_eq!(rows[0].parent_name, "Castle");
        assert_eq!(rows[0].direction, Direction::Outgoing);
        assert_eq!(rows[1].node_name, "Crown");
        assert_eq!(rows[1].depth, 2);

        let rows = RelationshipRow::from_records(
            graph
                .read(&ReadQuery::NodeRelationships {
                    name: "Crown".into(),
                    depth: 1,
                })
                .await?,
        )?;
        assert_eq!(rows[0].direction, Direction::Incoming);
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_statements_outside_catalogue_unsupported() -> Result<()> {
        let graph = MemoryGraph::new();
        let result = graph
            .read(&ReadQuery::Raw {
                statement: "MATCH (n) RETURN n".into(),
                params: PropertyMap::new(),
            })
            .await;
        assert!(matches!(
            result.unwrap_err().downcast_ref::<DatabaseError>(),
            Some(DatabaseError::Unsupported { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_catalogue_statement_answered() -> Result<()> {
        let graph = MemoryGraph::new();
        graph.insert_node(["Node", "Item"], props(json!({"name": "Crown"}))).await;
        graph.insert_node(["Node", "Location"], props(json!({"name": "Castle"}))).await;

        let rows = graph
            .read(&ReadQuery::Raw {
                statement: "MATCH (n) WHERE n.name IS NOT NULL\n  RETURN n.name AS name ORDER BY name".into(),
                params: PropertyMap::new(),
            })
            .await?;
        assert_eq!(names_from_records(rows)?, vec!["Castle".to_string(), "Crown".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_hierarchy_uses_first_non_base_label() -> Result<()> {
        let graph = MemoryGraph::new();
        graph
            .insert_node(["Node", "Location"], props(json!({"name": "Castle"})))
            .await;
        graph.insert_node(["Node"], props(json!({"name": "Loose"}))).await;
        graph
            .insert_node(["Character"], props(json!({"name": "Legacy"})))
            .await;

        let records = graph.read(&ReadQuery::LabelHierarchy).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["category"], json!("Location"));
        assert_eq!(records[0]["nodes"], json!(["Castle"]));
        Ok(())
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_limited() -> Result<()> {
        let graph = seeded().await?;
        let names = names_from_records(
            graph
                .read(&ReadQuery::SearchNames {
                    fragment: "ROOM".into(),
                    limit: 10,
                })
                .await?,
        )?;
        assert_eq!(names, vec!["Throne Room".to_string()]);

        let names = names_from_records(
            graph
                .read(&ReadQuery::SearchNames {
                    fragment: "".into(),
                    limit: 2,
                })
                .await?,
        )?;
        assert_eq!(names.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() -> Result<()> {
        let graph = MemoryGraph::new();
        graph.fail_next_verifications(1);
        assert!(graph.verify().await.is_err());
        assert!(graph.verify().await.is_ok());

        graph.fail_next_connects(1);
        assert!(graph.connect().await.is_err());
        assert!(graph.connect().await.is_ok());
        assert_eq!(graph.connect_count(), 1);
        Ok(())
    }
}
