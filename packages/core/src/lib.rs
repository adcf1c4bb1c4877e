//! WorldGraph Core
//!
//! Node synchronization and background graph operations for a property-graph
//! world-building database.
//!
//! # Architecture
//!
//! - **One transaction per save**: a [`NodePayload`] is reconciled onto the graph
//!   (system fields, label diff, property merge, relationship replace-all) atomically
//! - **One task per call**: every operation runs on its own tokio task with its
//!   own connection, emits at most one of {result, error} and can be cancelled
//! - **Cancel-and-replace**: a new request of a kind stops the previous one first
//! - **Two backends**: Bolt via `neo4rs` and the in-process [`MemoryGraph`]
//!
//! # Modules
//!
//! - [`models`] - Payloads, validation and typed read results
//! - [`db`] - Store traits, Cypher catalogue, connection management, backends
//! - [`operations`] - Task executor and the operations it runs
//! - [`services`] - `GraphService`, the coordinator and suggestions
//! - [`config`] - `SyncConfig`
//! - [`logging`] - tracing bootstrap

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod operations;
pub mod services;

pub use config::{MissingTargetPolicy, SyncConfig};
pub use db::{ConnectionManager, Connector, DatabaseError, GraphStore, MemoryGraph};
pub use models::*;
pub use operations::{SyncReport, TaskFailure, TaskHandle, TaskState};
pub use services::*;
