//! Services
//!
//! The outward layer the editing surface talks to:
//!
//! - `GraphService` - callback API; validates, schedules and routes results
//! - `OperationCoordinator` - one live task per operation kind, plus detached tasks
//! - `SuggestionEngine` - ranks tags, properties and relationships for a node

pub mod coordinator;
pub mod error;
pub mod graph_service;
pub mod suggestion_service;

pub use coordinator::{OperationCoordinator, OperationKind};
pub use error::ServiceError;
pub use graph_service::{FailureHandler, GraphService};
pub use suggestion_service::{
    PropertySuggestion, RelationshipSuggestion, SuggestionEngine, Suggestions, TagSuggestion,
};
