//! Suggestion Generation
//!
//! Ranks tags, properties and relationships the active node does not have yet,
//! based on how often they occur among its label peers and across the whole
//! graph.
//!
//! # Scoring
//!
//! - Tags and properties: `peer_share * 100 + global_share * 50`, where a share
//!   is occurrences divided by the number of distinct nodes in that set.
//! - Relationships: occurrences of `(type, target, direction)` over peers and
//!   all nodes combined, divided by `peer_nodes + all_nodes`, times 100.
//!
//! Confidences are rounded to two decimals; each list keeps the top 10,
//! highest first, ties broken by key. A property suggestion carries the most
//! common value among peers, falling back to the global one.

use crate::db::{ReadQuery, SnapshotScope};
use crate::models::{
    filter_user_properties, validate_name, Direction, NodeSnapshot, PropertyMap, ValidationError,
};
use crate::operations::{Operation, TaskContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const MAX_SUGGESTIONS: usize = 10;

const PEER_WEIGHT: f64 = 100.0;
const GLOBAL_WEIGHT: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSuggestion {
    pub tag: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySuggestion {
    pub key: String,
    pub value: Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSuggestion {
    pub rel_type: String,
    pub target: String,
    pub direction: Direction,
    pub properties: PropertyMap,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suggestions {
    pub tags: Vec<TagSuggestion>,
    pub properties: Vec<PropertySuggestion>,
    pub relationships: Vec<RelationshipSuggestion>,
}

impl Suggestions {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.properties.is_empty() && self.relationships.is_empty()
    }
}

/// Reads the three snapshot sets and ranks them
#[derive(Debug)]
pub struct SuggestionEngine {
    name: String,
    labels: Vec<String>,
}

impl SuggestionEngine {
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        validate_name(&name)?;
        let labels = labels
            .into_iter()
            .map(Into::into)
            .filter(|label: &String| !label.trim().is_empty())
            .collect();
        Ok(Self { name, labels })
    }
}

#[async_trait]
impl Operation for SuggestionEngine {
    type Output = Suggestions;

    fn name(&self) -> &'static str {
        "generate_suggestions"
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<Suggestions> {
        ctx.checkpoint()?;
        let session = ctx.session().await?;

        let active = NodeSnapshot::from_records(
            session
                .read(&ReadQuery::Snapshots(SnapshotScope::Named(self.name.clone())))
                .await?,
        )?
        .into_iter()
        .next();
        ctx.checkpoint()?;

        let peers = if self.labels.is_empty() {
            Vec::new()
        } else {
            NodeSnapshot::from_records(
                session
                    .read(&ReadQuery::Snapshots(SnapshotScope::SharingLabels(
                        self.labels.clone(),
                    )))
                    .await?,
            )?
        };
        ctx.checkpoint()?;

        let all = NodeSnapshot::from_records(
            session.read(&ReadQuery::Snapshots(SnapshotScope::All)).await?,
        )?;
        ctx.checkpoint()?;

        let suggestions = rank(&self.name, active.as_ref(), &peers, &all);
        tracing::info!(
            node = %self.name,
            peers = peers.len(),
            nodes = all.len(),
            tags = suggestions.tags.len(),
            properties = suggestions.properties.len(),
            relationships = suggestions.relationships.len(),
            "Suggestions generated"
        );
        Ok(suggestions)
    }
}

/// Rank suggestions for `name` given its snapshot, its label peers and all nodes
///
/// A node missing from the graph is treated as having nothing yet.
pub fn rank(
    name: &str,
    active: Option<&NodeSnapshot>,
    peers: &[NodeSnapshot],
    all: &[NodeSnapshot],
) -> Suggestions {
    Suggestions {
        tags: rank_tags(active, peers, all),
        properties: rank_properties(active, peers, all),
        relationships: rank_relationships(name, active, peers, all),
    }
}

fn distinct_nodes(nodes: &[NodeSnapshot]) -> usize {
    nodes
        .iter()
        .map(|node| node.name.as_str())
        .collect::<HashSet<_>>()
        .len()
}

fn share(count: usize, total: usize, weight: f64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * weight
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Highest confidence first, then key ascending; keep the top entries
fn top<T>(mut scored: Vec<(String, f64, T)>) -> Vec<(String, f64, T)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(MAX_SUGGESTIONS);
    scored
}

fn rank_tags(
    active: Option<&NodeSnapshot>,
    peers: &[NodeSnapshot],
    all: &[NodeSnapshot],
) -> Vec<TagSuggestion> {
    let existing: HashSet<&str> = active
        .map(|node| node.tags.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let count = |nodes: &[NodeSnapshot]| {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tag in nodes.iter().flat_map(|node| node.tags.iter()) {
            if !existing.contains(tag.as_str()) {
                *counts.entry(tag.clone()).or_default() += 1;
            }
        }
        counts
    };

    let mut confidence: BTreeMap<String, f64> = BTreeMap::new();
    let peer_total = distinct_nodes(peers);
    for (tag, n) in count(peers) {
        *confidence.entry(tag).or_default() += share(n, peer_total, PEER_WEIGHT);
    }
    let global_total = distinct_nodes(all);
    for (tag, n) in count(all) {
        *confidence.entry(tag).or_default() += share(n, global_total, GLOBAL_WEIGHT);
    }

    top(confidence.into_iter().map(|(tag, c)| (tag, c, ())).collect())
        .into_iter()
        .map(|(tag, confidence, ())| TagSuggestion {
            tag,
            confidence: round2(confidence),
        })
        .collect()
}

/// Occurrence count and most common value of one property key
#[derive(Default)]
struct PropertyStats {
    count: usize,
    values: BTreeMap<String, (usize, Value)>,
}

impl PropertyStats {
    fn add(&mut self, value: &Value) {
        self.count += 1;
        let entry = self
            .values
            .entry(value.to_string())
            .or_insert_with(|| (0, value.clone()));
        entry.0 += 1;
    }

    fn most_common(&self) -> Option<Value> {
        // BTreeMap order makes the earliest serialized value win ties
        let mut best: Option<&(usize, Value)> = None;
        for candidate in self.values.values() {
            if best.map_or(true, |current| candidate.0 > current.0) {
                best = Some(candidate);
            }
        }
        best.map(|(_, value)| value.clone())
    }
}

fn rank_properties(
    active: Option<&NodeSnapshot>,
    peers: &[NodeSnapshot],
    all: &[NodeSnapshot],
) -> Vec<PropertySuggestion> {
    let existing: BTreeSet<String> = active
        .map(|node| node.properties.keys().cloned().collect())
        .unwrap_or_default();

    let collect = |nodes: &[NodeSnapshot]| {
        let mut stats: BTreeMap<String, PropertyStats> = BTreeMap::new();
        for node in nodes {
            for (key, value) in filter_user_properties(&node.properties) {
                if existing.contains(&key) || value.is_null() {
                    continue;
                }
                stats.entry(key).or_default().add(&value);
            }
        }
        stats
    };

    let peer_stats = collect(peers);
    let global_stats = collect(all);
    let peer_total = distinct_nodes(peers);
    let global_total = distinct_nodes(all);

    let keys: BTreeSet<&String> = peer_stats.keys().chain(global_stats.keys()).collect();
    let scored = keys
        .into_iter()
        .filter_map(|key| {
            let peer = peer_stats.get(key);
            let global = global_stats.get(key);
            let confidence = peer.map_or(0.0, |s| share(s.count, peer_total, PEER_WEIGHT))
                + global.map_or(0.0, |s| share(s.count, global_total, GLOBAL_WEIGHT));
            let value = peer
                .and_then(PropertyStats::most_common)
                .or_else(|| global.and_then(PropertyStats::most_common))?;
            Some((key.clone(), confidence, value))
        })
        .collect();

    top(scored)
        .into_iter()
        .map(|(key, confidence, value)| PropertySuggestion {
            key,
            value,
            confidence: round2(confidence),
        })
        .collect()
}

fn rank_relationships(
    name: &str,
    active: Option<&NodeSnapshot>,
    peers: &[NodeSnapshot],
    all: &[NodeSnapshot],
) -> Vec<RelationshipSuggestion> {
    let total = distinct_nodes(peers) + distinct_nodes(all);
    if total == 0 {
        return Vec::new();
    }
    let linked: HashSet<&str> = active
        .map(|node| {
            node.relationships
                .iter()
                .map(|rel| rel.target.as_str())
                .collect()
        })
        .unwrap_or_default();

    let mut counts: BTreeMap<(String, String, Direction), usize> = BTreeMap::new();
    for rel in peers.iter().chain(all).flat_map(|node| node.relationships.iter()) {
        if rel.target == name || linked.contains(rel.target.as_str()) {
            continue;
        }
        *counts
            .entry((rel.relationship.clone(), rel.target.clone(), rel.direction))
            .or_default() += 1;
    }

    let scored = counts
        .into_iter()
        .map(|((rel_type, target, direction), n)| {
            let key = format!("{}\u{0}{}\u{0}{}", rel_type, target, direction.marker());
            (key, share(n, total, 100.0), (rel_type, target, direction))
        })
        .collect();

    top(scored)
        .into_iter()
        .map(|(_, confidence, (rel_type, target, direction))| RelationshipSuggestion {
            rel_type,
            target,
            direction,
            properties: PropertyMap::new(),
            confidence: round2(confidence),
        })
        .collect()
}
