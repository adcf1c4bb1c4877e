//! Typed read results
//!
//! Read operations materialize their results as a sequence of [`Record`]s (one
//! map per returned row, keyed by the statement's `RETURN` aliases). The types
//! here decode those records into strongly-shaped payloads so each consumer
//! receives exactly the fields its operation produces.

use crate::db::Record;
use crate::models::node::{
    filter_user_properties, Direction, NodePayload, PropertyMap, RelationshipSpec, BASE_LABEL,
};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

fn decode_row<T: DeserializeOwned>(record: Record, what: &str) -> Result<T> {
    serde_json::from_value(Value::Object(record))
        .with_context(|| format!("Failed to decode {} record", what))
}

/// A relationship incident to a loaded node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedRelationship {
    pub rel_type: String,
    /// Name of the node at the other end
    pub other_name: String,
    pub direction: Direction,
    pub properties: PropertyMap,
}

/// Full record of one node: base fields, properties, labels and incident edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedNode {
    pub name: String,
    /// Complete label set as stored, including the base marker
    pub labels: Vec<String>,
    /// Complete property map as stored, including system properties
    pub properties: PropertyMap,
    pub relationships: Vec<LoadedRelationship>,
}

#[derive(Deserialize)]
struct LoadRow {
    name: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    all_props: PropertyMap,
    #[serde(default)]
    relationships: Vec<LoadRelRow>,
}

#[derive(Deserialize)]
struct LoadRelRow {
    end: Option<String>,
    #[serde(rename = "type")]
    rel_type: Option<String>,
    dir: Direction,
    #[serde(default)]
    props: Option<PropertyMap>,
}

impl LoadedNode {
    /// Decode a load result; the statement is limited to one match
    pub fn from_records(records: Vec<Record>) -> Result<Option<Self>> {
        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };
        let row: LoadRow = decode_row(record, "load")?;

        let relationships = row
            .relationships
            .into_iter()
            .filter_map(|rel| {
                Some(LoadedRelationship {
                    rel_type: rel.rel_type?,
                    other_name: rel.end?,
                    direction: rel.dir,
                    properties: rel.props.unwrap_or_default(),
                })
            })
            .collect();

        Ok(Some(Self {
            name: row.name,
            labels: row.labels,
            properties: row.all_props,
            relationships,
        }))
    }

    /// System property value (`_created`, `_modified`, `_author`)
    pub fn system_field(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Labels without the base marker
    pub fn domain_labels(&self) -> BTreeSet<String> {
        self.labels
            .iter()
            .filter(|label| label.as_str() != BASE_LABEL)
            .cloned()
            .collect()
    }

    /// Turn the loaded node back into a payload the editing surface can submit
    ///
    /// System properties and the base marker are stripped.
    pub fn into_payload(self) -> NodePayload {
        let description = self
            .properties
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tags = self
            .properties
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let labels = self.domain_labels();
        let properties = filter_user_properties(&self.properties);
        let relationships = self
            .relationships
            .into_iter()
            .map(|rel| RelationshipSpec {
                rel_type: rel.rel_type,
                target_name: rel.other_name,
                direction: rel.direction,
                properties: rel.properties,
            })
            .collect();

        NodePayload {
            name: self.name,
            description,
            tags,
            labels,
            properties,
            relationships,
        }
    }
}

/// One (node, incoming edge) pair along a traversal path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub node_name: String,
    pub labels: Vec<String>,
    pub parent_name: String,
    pub rel_type: String,
    pub direction: Direction,
    pub depth: u32,
}

impl RelationshipRow {
    /// Decode traversal rows, preserving the ascending-depth order and dropping
    /// duplicates and rows with missing endpoints
    pub fn from_records(records: Vec<Record>) -> Result<Vec<Self>> {
        #[derive(Deserialize)]
        struct Row {
            node_name: Option<String>,
            #[serde(default)]
            labels: Vec<String>,
            parent_name: Option<String>,
            rel_type: String,
            direction: Direction,
            depth: u32,
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let row: Row = decode_row(record, "relationship")?;
            let (Some(node_name), Some(parent_name)) = (row.node_name, row.parent_name) else {
                continue;
            };
            let row = RelationshipRow {
                node_name,
                labels: row.labels,
                parent_name,
                rel_type: row.rel_type,
                direction: row.direction,
                depth: row.depth,
            };
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
        rows.sort_by_key(|row| row.depth);
        Ok(rows)
    }
}

/// Primary label → node names
pub type LabelHierarchy = BTreeMap<String, Vec<String>>;

/// Decode `(category, nodes)` rows into a hierarchy
pub fn label_hierarchy_from_records(records: Vec<Record>) -> Result<LabelHierarchy> {
    #[derive(Deserialize)]
    struct Row {
        category: Option<String>,
        #[serde(default)]
        nodes: Vec<Option<String>>,
    }

    let mut hierarchy = LabelHierarchy::new();
    for record in records {
        let row: Row = decode_row(record, "hierarchy")?;
        if let Some(category) = row.category {
            hierarchy
                .entry(category)
                .or_default()
                .extend(row.nodes.into_iter().flatten());
        }
    }
    Ok(hierarchy)
}

/// Decode single-column `name` rows, skipping nulls
pub fn names_from_records(records: Vec<Record>) -> Result<Vec<String>> {
    Ok(records
        .into_iter()
        .filter_map(|mut record| match record.remove("name") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        })
        .collect())
}

/// Name and modification time of the most recently saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedNode {
    pub name: String,
    pub modified: Option<String>,
}

impl ModifiedNode {
    pub fn from_records(records: Vec<Record>) -> Result<Option<Self>> {
        match records.into_iter().next() {
            Some(record) => Ok(Some(decode_row(record, "last modified")?)),
            None => Ok(None),
        }
    }
}

/// Relationship as seen from a node snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRelationship {
    pub relationship: String,
    pub target: String,
    pub direction: Direction,
    #[serde(default)]
    pub properties: PropertyMap,
}

/// Flattened node used for suggestion statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub tags: Vec<String>,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
    pub relationships: Vec<SnapshotRelationship>,
}

impl NodeSnapshot {
    pub fn from_records(records: Vec<Record>) -> Result<Vec<Self>> {
        #[derive(Deserialize)]
        struct Row {
            name: Option<String>,
            #[serde(default)]
            tags: Option<Vec<String>>,
            #[serde(default)]
            labels: Vec<String>,
            #[serde(default)]
            properties: PropertyMap,
            #[serde(default)]
            relationships: Vec<RelRow>,
        }

        #[derive(Deserialize)]
        struct RelRow {
            relationship: Option<String>,
            target: Option<String>,
            direction: Direction,
            #[serde(default)]
            properties: Option<PropertyMap>,
        }

        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            let row: Row = decode_row(record, "snapshot")?;
            let Some(name) = row.name else { continue };
            let relationships = row
                .relationships
                .into_iter()
                .filter_map(|rel| {
                    Some(SnapshotRelationship {
                        relationship: rel.relationship?,
                        target: rel.target?,
                        direction: rel.direction,
                        properties: rel.properties.unwrap_or_default(),
                    })
                })
                .collect();
            snapshots.push(NodeSnapshot {
                name,
                tags: row.tags.unwrap_or_default(),
                labels: row.labels,
                properties: row.properties,
                relationships,
            });
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_load_record_decodes_and_drops_null_relationships() {
        let records = vec![record(json!({
            "name": "Castle",
            "labels": ["Node", "Location"],
            "all_props": {"name": "Castle", "_created": "2024-01-01T00:00:00Z", "tags": ["fortress"]},
            "relationships": [
                {"end": "Throne Room", "type": "CONTAINS", "dir": ">", "props": {"since": 1200}},
                {"end": null, "type": null, "dir": "<", "props": null}
            ]
        }))];

        let node = LoadedNode::from_records(records).unwrap().unwrap();
        assert_eq!(node.name, "Castle");
        assert_eq!(node.system_field("_created"), Some("2024-01-01T00:00:00Z"));
        assert_eq!(node.relationships.len(), 1);
        assert_eq!(node.relationships[0].direction, Direction::Outgoing);
        assert_eq!(node.relationships[0].properties["since"], json!(1200));
    }

    #[test]
    fn test_empty_load_result_is_none() {
        assert!(LoadedNode::from_records(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_into_payload_strips_system_fields() {
        let node = LoadedNode {
            name: "Castle".to_string(),
            labels: vec!["Node".to_string(), "Location".to_string()],
            properties: record(json!({
                "name": "Castle",
                "description": "Old keep",
                "tags": ["fortress"],
                "_created": "2024-01-01T00:00:00Z",
                "_author": "System",
                "population": 40
            })),
            relationships: vec![LoadedRelationship {
                rel_type: "CONTAINS".to_string(),
                other_name: "Throne Room".to_string(),
                direction: Direction::Outgoing,
                properties: PropertyMap::new(),
            }],
        };

        let payload = node.into_payload();
        assert_eq!(payload.description, "Old keep");
        assert_eq!(payload.tags, vec!["fortress".to_string()]);
        assert_eq!(payload.labels.len(), 1);
        assert!(payload.labels.contains("Location"));
        assert_eq!(payload.properties.len(), 1);
        assert_eq!(payload.relationships[0].target_name, "Throne Room");
    }

    #[test]
    fn test_relationship_rows_deduplicated_and_ordered() {
        let row = |name: &str, depth: u32| {
            record(json!({
                "node_name": name,
                "labels": ["Node"],
                "parent_name": "Castle",
                "rel_type": "CONTAINS",
                "direction": ">",
                "depth": depth
            }))
        };
        let records = vec![row("Vault", 2), row("Hall", 1), row("Hall", 1)];

        let rows = RelationshipRow::from_records(records).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].node_name, "Hall");
        assert_eq!(rows[1].depth, 2);
    }

    #[test]
    fn test_hierarchy_and_names_skip_nulls() {
        let hierarchy = label_hierarchy_from_records(vec![
            record(json!({"category": "Location", "nodes": ["Castle", null]})),
            record(json!({"category": null, "nodes": ["Ghost"]})),
        ])
        .unwrap();
        assert_eq!(hierarchy["Location"], vec!["Castle".to_string()]);
        assert_eq!(hierarchy.len(), 1);

        let names =
            names_from_records(vec![record(json!({"name": "A"})), record(json!({"name": null}))])
                .unwrap();
        assert_eq!(names, vec!["A".to_string()]);
    }
}
