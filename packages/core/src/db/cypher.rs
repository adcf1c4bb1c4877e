//! Cypher statement catalogue
//!
//! Every statement the engine issues is authored here, once. Values are always
//! bound as `$parameters`; the only text interpolated into a statement is
//! label and relationship-type identifiers (which Cypher cannot parameterize)
//! and the traversal hop bound. Identifiers go through [`quote_identifier`].

use crate::db::graph_store::{ReadQuery, SnapshotScope};
use crate::models::{
    validate_identifier, Direction, PropertyMap, RelationshipSpec, ValidationError, BASE_LABEL,
    STUB_LABEL,
};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Statement text plus bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: PropertyMap,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: PropertyMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Wrap a label or relationship type in backticks after validating it
pub fn quote_identifier(kind: &'static str, value: &str) -> Result<String, ValidationError> {
    validate_identifier(kind, value)?;
    Ok(format!("`{}`", value))
}

const LOAD_NODE: &str = "\
MATCH (n {name: $name})
WITH n, labels(n) AS labels,
     [(n)-[r]->(m) | {end: m.name, type: type(r), dir: '>', props: properties(r)}] AS out_rels,
     [(n)<-[r2]-(o) | {end: o.name, type: type(r2), dir: '<', props: properties(r2)}] AS in_rels,
     properties(n) AS all_props
RETURN n.name AS name,
       out_rels + in_rels AS relationships,
       labels,
       all_props
LIMIT 1";

const SEARCH_NAMES: &str = "\
MATCH (n)
WHERE n.name IS NOT NULL AND toLower(n.name) CONTAINS toLower($fragment)
RETURN n.name AS name
ORDER BY name
LIMIT $limit";

const LABEL_HIERARCHY: &str = "\
MATCH (n)
WITH n, labels(n) AS labels
WHERE size(labels) > 1
WITH n, head([label IN labels WHERE label <> $base_label]) AS category
WHERE category IS NOT NULL
RETURN category, collect(n.name) AS nodes
ORDER BY category";

const ALL_NODE_NAMES: &str = "\
MATCH (n)
WHERE n.name IS NOT NULL
RETURN n.name AS name
ORDER BY name";

const LAST_MODIFIED: &str = "\
MATCH (n)
WHERE n._modified IS NOT NULL
RETURN n.name AS name, n._modified AS modified
ORDER BY modified DESC
LIMIT 1";

/// Render a read query into statement text and parameters
pub fn read_statement(query: &ReadQuery) -> Result<Statement, ValidationError> {
    let statement = match query {
        ReadQuery::LoadNode { name } => Statement::new(LOAD_NODE).param("name", name.as_str()),
        ReadQuery::SearchNames { fragment, limit } => Statement::new(SEARCH_NAMES)
            .param("fragment", fragment.as_str())
            .param("limit", *limit as u64),
        ReadQuery::NodeRelationships { name, depth } => {
            node_relationships(*depth)?.param("name", name.as_str())
        }
        ReadQuery::LabelHierarchy => Statement::new(LABEL_HIERARCHY).param("base_label", BASE_LABEL),
        ReadQuery::AllNodeNames => Statement::new(ALL_NODE_NAMES),
        ReadQuery::LastModified => Statement::new(LAST_MODIFIED),
        ReadQuery::Snapshots(scope) => snapshots(scope),
        ReadQuery::Raw { statement, params } => Statement {
            text: statement.clone(),
            params: params.clone(),
        },
    };
    Ok(statement)
}

/// Traversal of `depth + 1` hops; `depth` must be at least 1
fn node_relationships(depth: u32) -> Result<Statement, ValidationError> {
    if depth < 1 {
        return Err(ValidationError::InvalidDepth(depth));
    }
    let max_hops = depth + 1;
    Ok(Statement::new(format!(
        "\
MATCH path = (n)-[*1..{max_hops}]-(connected_node)
WHERE n.name = $name
  AND ALL(r IN relationships(path) WHERE startNode(r) IS NOT NULL AND endNode(r) IS NOT NULL)
  AND ALL(node IN nodes(path) WHERE node IS NOT NULL)
WITH path, length(path) AS path_length
UNWIND range(1, path_length) AS idx
WITH
    nodes(path)[idx] AS current_node,
    relationships(path)[idx - 1] AS current_rel,
    nodes(path)[idx - 1] AS parent_node,
    idx AS depth
RETURN DISTINCT
    current_node.name AS node_name,
    labels(current_node) AS labels,
    parent_node.name AS parent_name,
    type(current_rel) AS rel_type,
    CASE WHEN startNode(current_rel) = parent_node THEN '>' ELSE '<' END AS direction,
    depth
ORDER BY depth ASC"
    )))
}

fn snapshots(scope: &SnapshotScope) -> Statement {
    let (clause, statement) = match scope {
        SnapshotScope::Named(name) => (
            "n.name = $name",
            Statement::new("").param("name", name.as_str()),
        ),
        SnapshotScope::SharingLabels(labels) => (
            "ANY(label IN labels(n) WHERE label IN $labels)",
            Statement::new("").param("labels", labels.clone()),
        ),
        SnapshotScope::All => ("n.name IS NOT NULL", Statement::new("")),
    };
    Statement {
        text: format!(
            "\
MATCH (n)
WHERE {clause}
RETURN n.name AS name,
       n.tags AS tags,
       labels(n) AS labels,
       properties(n) AS properties,
       [(n)-[r]->(m) | {{relationship: type(r), target: m.name, properties: properties(r), direction: '>'}}] +
       [(n)<-[r2]-(o) | {{relationship: type(r2), target: o.name, properties: properties(r2), direction: '<'}}] AS relationships"
        ),
        params: statement.params,
    }
}

pub fn fetch_existing(name: &str) -> Statement {
    Statement::new("MATCH (n {name: $name}) RETURN n._created AS created LIMIT 1").param("name", name)
}

pub fn create_node(name: &str, description: &str, tags: &[String]) -> Statement {
    Statement::new(format!(
        "CREATE (n:`{BASE_LABEL}` {{name: $name, description: $description, tags: $tags}})"
    ))
    .param("name", name)
    .param("description", description)
    .param("tags", tags.to_vec())
}

pub fn reset_properties(name: &str, base: &PropertyMap) -> Statement {
    Statement::new("MATCH (n {name: $name}) SET n = $base_props")
        .param("name", name)
        .param("base_props", Value::Object(base.clone()))
}

pub fn current_labels(name: &str) -> Statement {
    Statement::new("MATCH (n {name: $name}) RETURN labels(n) AS labels LIMIT 1").param("name", name)
}

/// `SET n:`A`:`B``
pub fn add_labels(name: &str, labels: &[String]) -> Result<Statement, ValidationError> {
    let quoted = labels
        .iter()
        .map(|label| quote_identifier("label", label))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(
        Statement::new(format!("MATCH (n {{name: $name}}) SET n:{}", quoted.join(":")))
            .param("name", name),
    )
}

/// `REMOVE n:`A`, n:`B``
pub fn remove_labels(name: &str, labels: &[String]) -> Result<Statement, ValidationError> {
    let quoted = labels
        .iter()
        .map(|label| quote_identifier("label", label).map(|label| format!("n:{}", label)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(
        Statement::new(format!("MATCH (n {{name: $name}}) REMOVE {}", quoted.join(", ")))
            .param("name", name),
    )
}

pub fn merge_properties(name: &str, properties: &PropertyMap) -> Statement {
    Statement::new("MATCH (n {name: $name}) SET n += $properties")
        .param("name", name)
        .param("properties", Value::Object(properties.clone()))
}

pub fn delete_relationships(name: &str) -> Statement {
    Statement::new(
        "MATCH (n {name: $name})-[r]-() WITH DISTINCT r DELETE r RETURN count(r) AS deleted",
    )
    .param("name", name)
}

pub fn node_exists(name: &str) -> Statement {
    Statement::new("MATCH (n {name: $name}) RETURN count(n) AS count").param("name", name)
}

pub fn create_stub(properties: &PropertyMap) -> Statement {
    Statement::new(format!(
        "CREATE (t:`{BASE_LABEL}`:`{STUB_LABEL}`) SET t = $stub_props"
    ))
    .param("stub_props", Value::Object(properties.clone()))
}

/// Edge merge oriented by the relationship's direction; returns `merged` = 0 when the
/// target is missing
pub fn merge_relationship(
    name: &str,
    relationship: &RelationshipSpec,
) -> Result<Statement, ValidationError> {
    let rel_type = quote_identifier("relationship type", &relationship.rel_type)?;
    let pattern = match relationship.direction {
        Direction::Outgoing => format!("(n)-[r:{}]->(target)", rel_type),
        Direction::Incoming => format!("(n)<-[r:{}]-(target)", rel_type),
    };
    Ok(Statement::new(format!(
        "\
MATCH (n {{name: $name}})
MATCH (target {{name: $target_name}})
MERGE {pattern}
SET r = $properties
RETURN count(r) AS merged"
    ))
    .param("name", name)
    .param("target_name", relationship.target_name.as_str())
    .param("properties", Value::Object(relationship.properties.clone())))
}

pub fn detach_delete(name: &str) -> Statement {
    Statement::new("MATCH (n {name: $name}) DETACH DELETE n").param("name", name)
}

pub fn rename_node(name: &str, new_name: &str, modified: &str) -> Statement {
    Statement::new(
        "\
MATCH (n {name: $name})
SET n.name = $new_name, n._modified = $modified
RETURN count(n) AS renamed",
    )
    .param("name", name)
    .param("new_name", new_name)
    .param("modified", modified)
}

const WRITE_KEYWORD_PATTERN: &str = r"(?i)\b(CREATE|MERGE|DELETE|DETACH|REMOVE|SET|DROP|FOREACH)\b";
const LOAD_CSV_PATTERN: &str = r"(?i)\bLOAD\s+CSV\b";
const UNSAFE_CALL_PATTERN: &str = r"(?i)\bCALL\s+(db|apoc|graph|dbms)\.";

/// Reject caller-authored statements that could write or reach admin procedures
///
/// Keywords are matched as whole words, case-insensitive, anywhere in the
/// text (string literals included).
///
/// # Examples
///
/// ```
/// # use worldgraph_core::db::cypher::ensure_read_only;
/// assert!(ensure_read_only("MATCH (n) RETURN n.name").is_ok());
/// assert!(ensure_read_only("MATCH (n) DETACH DELETE n").is_err());
/// ```
pub fn ensure_read_only(statement: &str) -> Result<(), ValidationError> {
    static WRITE_REGEX: OnceLock<Regex> = OnceLock::new();
    let write_regex = WRITE_REGEX.get_or_init(|| Regex::new(WRITE_KEYWORD_PATTERN).unwrap());
    if let Some(found) = write_regex.find(statement) {
        return Err(ValidationError::WriteStatementRejected {
            keyword: found.as_str().to_uppercase(),
        });
    }

    static LOAD_CSV_REGEX: OnceLock<Regex> = OnceLock::new();
    let load_csv_regex = LOAD_CSV_REGEX.get_or_init(|| Regex::new(LOAD_CSV_PATTERN).unwrap());
    if load_csv_regex.is_match(statement) {
        return Err(ValidationError::WriteStatementRejected {
            keyword: "LOAD CSV".to_string(),
        });
    }

    static CALL_REGEX: OnceLock<Regex> = OnceLock::new();
    let call_regex = CALL_REGEX.get_or_init(|| Regex::new(UNSAFE_CALL_PATTERN).unwrap());
    if let Some(captures) = call_regex.captures(statement) {
        return Err(ValidationError::UnsafeProcedureRejected {
            call: format!("CALL {}.", captures[1].to_lowercase()),
        });
    }
    Ok(())
}
