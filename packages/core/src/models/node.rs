//! Node Payload Data Structures
//!
//! This module defines the in-memory description of a graph entity that the
//! synchronization engine applies to the database.
//!
//! # Architecture
//!
//! - **Name as identity**: A `NodePayload` has no identity of its own; the graph
//!   node is addressed by its unique `name`
//! - **Labels as a set**: The synthetic base label [`BASE_LABEL`] is managed by the
//!   engine and never diffed
//! - **System properties**: Keys starting with `_` (`_created`, `_modified`,
//!   `_author`) are engine-managed and never accepted from caller data
//! - **Relationships as a list**: Every save replaces the full relationship set
//!
//! # Examples
//!
//! ```rust
//! use worldgraph_core::models::{Direction, NodePayload, RelationshipSpec};
//!
//! let payload = NodePayload::new("Castle")
//!     .with_label("Location")
//!     .with_tags(["fortress"])
//!     .with_relationship(RelationshipSpec::new("CONTAINS", "Throne Room", Direction::Outgoing));
//!
//! assert!(payload.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Free-form property map stored on nodes and relationships
pub type PropertyMap = Map<String, Value>;

/// Synthetic label carried by every node the engine creates
pub const BASE_LABEL: &str = "Node";

/// Label given to placeholder nodes created for missing relationship targets
pub const STUB_LABEL: &str = "STUMP";

/// Creation timestamp, written once
pub const CREATED_KEY: &str = "_created";

/// Modification timestamp, written on every save
pub const MODIFIED_KEY: &str = "_modified";

/// Author identity, written on every save
pub const AUTHOR_KEY: &str = "_author";

/// Base keys written by the reset step, never merged from `properties`
pub const RESERVED_PROPERTY_KEYS: [&str; 3] = ["name", "description", "tags"];

/// Validation errors raised synchronously before any background task exists
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Node must have a non-empty name")]
    EmptyName,

    #[error("Node must have at least one label")]
    NoLabels,

    #[error("Node labels must be non-empty")]
    BlankLabel,

    #[error("Invalid {kind} identifier {value:?}: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Invalid value for property {key:?}: {reason}")]
    InvalidProperty { key: String, reason: &'static str },

    #[error("Depth must be a positive integer (at least 1), got {0}")]
    InvalidDepth(u32),

    #[error("Limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("Relationship target name must be non-empty (type {rel_type})")]
    EmptyRelationshipTarget { rel_type: String },

    #[error("Write operation '{keyword}' not allowed in read-only query")]
    WriteStatementRejected { keyword: String },

    #[error("Unsafe procedure call '{call}' not allowed in read-only query")]
    UnsafeProcedureRejected { call: String },
}

impl ValidationError {
    /// Create an invalid identifier error
    pub fn invalid_identifier(
        kind: &'static str,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
            reason,
        }
    }

    /// Create an invalid property error
    pub fn invalid_property(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            reason,
        }
    }
}

/// Relationship orientation, from the perspective of the node being saved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// `(node)-[r]->(target)`
    #[serde(rename = ">")]
    Outgoing,
    /// `(node)<-[r]-(target)`
    #[serde(rename = "<")]
    Incoming,
}

impl Direction {
    /// Marker used in statement results (`>` or `<`)
    pub fn marker(self) -> &'static str {
        match self {
            Direction::Outgoing => ">",
            Direction::Incoming => "<",
        }
    }

    /// Parse a result marker. Accepts the arrow markers and the long forms.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            ">" | "OUTGOING" | "OUT" => Some(Direction::Outgoing),
            "<" | "INCOMING" | "IN" => Some(Direction::Incoming),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// One typed edge between the saved node and a target resolved by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSpec {
    /// Relationship type, rendered into statement text as an identifier
    pub rel_type: String,

    /// Name of the node at the other end
    pub target_name: String,

    /// Orientation relative to the saved node
    pub direction: Direction,

    /// Edge properties; fully overwrite any existing edge properties
    #[serde(default)]
    pub properties: PropertyMap,
}

impl RelationshipSpec {
    pub fn new(
        rel_type: impl Into<String>,
        target_name: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            target_name: target_name.into(),
            direction,
            properties: PropertyMap::new(),
        }
    }

    /// Attach one edge property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// The unit of synchronization
///
/// Constructed fresh for every save; the engine does not retain it after the
/// transaction commits or aborts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    /// Unique key within the graph
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Desired label set, excluding the base marker
    #[serde(default)]
    pub labels: BTreeSet<String>,

    /// Caller properties; system and reserved keys are dropped before the merge
    #[serde(default)]
    pub properties: PropertyMap,

    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

impl NodePayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipSpec) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Validate the payload before scheduling a save
    ///
    /// Rejects empty names, empty or blank label sets, identifiers that cannot be
    /// safely rendered into statement text, and property values the graph cannot
    /// store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;

        if self.labels.is_empty() {
            return Err(ValidationError::NoLabels);
        }
        for label in &self.labels {
            if label.trim().is_empty() {
                return Err(ValidationError::BlankLabel);
            }
            validate_identifier("label", label)?;
        }

        for (key, value) in &self.properties {
            validate_property_value(key, value)?;
        }

        for rel in &self.relationships {
            validate_identifier("relationship type", &rel.rel_type)?;
            if rel.target_name.trim().is_empty() {
                return Err(ValidationError::EmptyRelationshipTarget {
                    rel_type: rel.rel_type.clone(),
                });
            }
            for (key, value) in &rel.properties {
                validate_property_value(key, value)?;
            }
        }

        Ok(())
    }

    /// Desired labels with the base marker removed
    pub fn domain_labels(&self) -> BTreeSet<String> {
        self.labels
            .iter()
            .filter(|label| label.as_str() != BASE_LABEL)
            .cloned()
            .collect()
    }

    /// Caller properties that may be merged onto the node
    pub fn user_properties(&self) -> PropertyMap {
        filter_user_properties(&self.properties)
    }
}

/// True for engine-managed keys (leading underscore)
pub fn is_system_property(key: &str) -> bool {
    key.starts_with('_')
}

/// Drop system keys and base keys from a property map
pub fn filter_user_properties(properties: &PropertyMap) -> PropertyMap {
    properties
        .iter()
        .filter(|(key, _)| !is_system_property(key) && !RESERVED_PROPERTY_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Reject empty or whitespace-only node names
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

/// Check that an identifier can be wrapped in backticks without escaping
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::invalid_identifier(kind, value, "must not be blank"));
    }
    if value.contains('`') {
        return Err(ValidationError::invalid_identifier(
            kind,
            value,
            "must not contain backticks",
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::invalid_identifier(
            kind,
            value,
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Property values must be scalars or flat lists of scalars
fn validate_property_value(key: &str, value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Object(_) => Err(ValidationError::invalid_property(
            key,
            "maps cannot be stored as property values",
        )),
        Value::Array(items) => {
            if items
                .iter()
                .any(|item| matches!(item, Value::Array(_) | Value::Object(_)))
            {
                return Err(ValidationError::invalid_property(
                    key,
                    "lists must contain only scalar values",
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn castle() -> NodePayload {
        NodePayload::new("Castle")
            .with_label("Location")
            .with_tags(["fortress"])
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(castle().validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let payload = NodePayload::new("   ").with_label("Location");
        assert_eq!(payload.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_missing_labels_rejected() {
        let payload = NodePayload::new("Castle");
        assert_eq!(payload.validate(), Err(ValidationError::NoLabels));
    }

    #[test]
    fn test_blank_label_rejected() {
        let payload = castle().with_label("  ");
        assert_eq!(payload.validate(), Err(ValidationError::BlankLabel));
    }

    #[test]
    fn test_backtick_in_label_rejected() {
        let payload = castle().with_label("Evil`) DETACH DELETE n //");
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::InvalidIdentifier { kind: "label", .. })
        ));
    }

    #[test]
    fn test_backtick_in_relationship_type_rejected() {
        let payload = castle().with_relationship(RelationshipSpec::new(
            "OWNS`]->() DELETE n //",
            "Keep",
            Direction::Outgoing,
        ));
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::InvalidIdentifier {
                kind: "relationship type",
                ..
            })
        ));
    }

    #[test]
    fn test_nested_property_values_rejected() {
        let payload = castle().with_property("coords", json!({"x": 1}));
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::InvalidProperty { .. })
        ));

        let payload = castle().with_property("grid", json!([[1, 2], [3, 4]]));
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::InvalidProperty { .. })
        ));

        let payload = castle().with_property("walls", json!(["north", "south"]));
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_user_properties_drop_system_and_reserved_keys() {
        let payload = castle()
            .with_property("_created", "1999-01-01")
            .with_property("_secret", true)
            .with_property("description", "sneaky")
            .with_property("population", 120);

        let filtered = payload.user_properties();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("population"), Some(&json!(120)));
    }

    #[test]
    fn test_domain_labels_exclude_base_marker() {
        let payload = castle().with_label(BASE_LABEL);
        let labels = payload.domain_labels();
        assert!(labels.contains("Location"));
        assert!(!labels.contains(BASE_LABEL));
    }

    #[test]
    fn test_direction_markers() {
        assert_eq!(Direction::from_marker(">"), Some(Direction::Outgoing));
        assert_eq!(Direction::from_marker("INCOMING"), Some(Direction::Incoming));
        assert_eq!(Direction::from_marker("sideways"), None);
        assert_eq!(Direction::Incoming.to_string(), "<");
    }

    #[test]
    fn test_payload_serialization_uses_camel_case() {
        let payload = castle().with_relationship(RelationshipSpec::new(
            "CONTAINS",
            "Throne Room",
            Direction::Outgoing,
        ));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["relationships"][0]["relType"], "CONTAINS");
        assert_eq!(value["relationships"][0]["targetName"], "Throne Room");
        assert_eq!(value["relationships"][0]["direction"], ">");
    }
}
