//! Data Models
//!
//! This module contains the data structures the engine operates on:
//!
//! - `NodePayload` - In-memory description of one node to synchronize
//! - `RelationshipSpec` - One typed edge to a target resolved by name
//! - Typed read results (`LoadedNode`, `RelationshipRow`, ...) decoded from records

mod node;
mod records;

pub use node::{
    filter_user_properties, is_system_property, validate_identifier, validate_name, Direction,
    NodePayload, PropertyMap, RelationshipSpec, ValidationError, AUTHOR_KEY, BASE_LABEL,
    CREATED_KEY, MODIFIED_KEY, RESERVED_PROPERTY_KEYS, STUB_LABEL,
};
pub use records::{
    label_hierarchy_from_records, names_from_records, LabelHierarchy, LoadedNode,
    LoadedRelationship, ModifiedNode, NodeSnapshot, RelationshipRow, SnapshotRelationship,
};
