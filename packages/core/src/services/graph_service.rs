//! Graph Service - Callback API for the Editing Surface
//!
//! Every call validates its input synchronously, then schedules one
//! background task and returns its [`TaskHandle`]. The result arrives once
//! through the typed `on_result` callback; an operational failure arrives
//! once through the service-wide failure handler instead. A task replaced or
//! cancelled before it finished emits nothing.
//!
//! # Slots
//!
//! | Call | Slot |
//! |---|---|
//! | `load_node` | [`OperationKind::Load`] |
//! | `save_node` | [`OperationKind::Save`] |
//! | `delete_node` | [`OperationKind::Delete`] |
//! | `search_nodes_by_prefix` | [`OperationKind::Search`] |
//! | `get_node_relationships` | [`OperationKind::Relationships`] |
//! | `get_label_hierarchy` | [`OperationKind::Hierarchy`] |
//! | `rename_node` | [`OperationKind::Rename`] |
//! | `get_all_node_names` | [`OperationKind::NameCache`] |
//! | `get_last_modified_node` | [`OperationKind::LastModified`] |
//! | `execute_read_query` | caller's choice |
//! | `generate_suggestions` | detached |

use crate::config::SyncConfig;
use crate::db::cypher::ensure_read_only;
use crate::db::{Connector, ReadQuery, Record};
use crate::models::{
    label_hierarchy_from_records, names_from_records, validate_name, LabelHierarchy, LoadedNode,
    ModifiedNode, NodePayload, PropertyMap, RelationshipRow, ValidationError,
};
use crate::operations::{
    DeleteEngine, NodeSyncEngine, Operation, QueryExecutor, RenameEngine, SyncOptions, SyncReport,
    TaskExecutor, TaskFailure, TaskHandle,
};
use crate::services::coordinator::{OperationCoordinator, OperationKind};
use crate::services::error::ServiceError;
use crate::services::suggestion_service::{SuggestionEngine, Suggestions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives every operational failure, once per failed task
pub type FailureHandler = Arc<dyn Fn(TaskFailure) + Send + Sync>;

#[derive(Clone)]
pub struct GraphService {
    config: Arc<SyncConfig>,

    /// Builds one private connection per task
    connector: Arc<dyn Connector>,

    coordinator: Arc<OperationCoordinator>,

    /// Failures are always logged by the task; this is for the caller
    on_failure: Option<FailureHandler>,

    shut_down: Arc<AtomicBool>,
}

impl GraphService {
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            coordinator: Arc::new(OperationCoordinator::new()),
            on_failure: None,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Service talking Bolt to the endpoint named in `config`
    #[cfg(feature = "bolt")]
    pub fn bolt(config: SyncConfig) -> Self {
        let connector = Arc::new(crate::db::BoltConnector::new(config.clone()));
        Self::new(config, connector)
    }

    pub fn with_error_handler(mut self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &OperationCoordinator {
        &self.coordinator
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn executor<O: Operation>(
        &self,
        operation: O,
        on_result: impl FnOnce(O::Output) + Send + 'static,
    ) -> Result<TaskExecutor<O>, ServiceError> {
        if self.is_shut_down() {
            return Err(ServiceError::ShutDown);
        }
        let mut executor =
            TaskExecutor::new(operation, self.connector.clone()).on_result(on_result);
        if let Some(handler) = self.on_failure.clone() {
            executor = executor.on_error(move |failure| handler(failure));
        }
        Ok(executor)
    }

    async fn schedule<O: Operation>(
        &self,
        kind: OperationKind,
        operation: O,
        on_result: impl FnOnce(O::Output) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        let executor = self.executor(operation, on_result)?;
        let handle = self.coordinator.submit(kind, executor).await;
        self.admit(handle)
    }

    /// Cancel a task registered after `shutdown` took its snapshot
    ///
    /// `shutdown` raises the flag before collecting handles, so any task
    /// registered too late to be collected sees the flag here.
    fn admit(&self, handle: Arc<TaskHandle>) -> Result<Arc<TaskHandle>, ServiceError> {
        if self.is_shut_down() {
            handle.request_cancel();
            tracing::debug!(task_id = %handle.id(), "Cancelled task submitted during shutdown");
            return Err(ServiceError::ShutDown);
        }
        Ok(handle)
    }

    /// Full record of one node, or `None` if no node has this name
    pub async fn load_node(
        &self,
        name: &str,
        on_result: impl FnOnce(Option<LoadedNode>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        validate_name(name)?;
        let query = ReadQuery::LoadNode {
            name: name.to_string(),
        };
        self.schedule(
            OperationKind::Load,
            QueryExecutor::decoded("load_node", query, LoadedNode::from_records),
            on_result,
        )
        .await
    }

    /// Atomic save; the report says what the committed transaction changed
    pub async fn save_node(
        &self,
        payload: NodePayload,
        on_result: impl FnOnce(SyncReport) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        let engine = NodeSyncEngine::new(payload, SyncOptions::from(self.config.as_ref()))?;
        self.schedule(OperationKind::Save, engine, on_result).await
    }

    /// Detach-delete by name; an absent node still reports `true`
    pub async fn delete_node(
        &self,
        name: &str,
        on_result: impl FnOnce(bool) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        let engine = DeleteEngine::new(name)?;
        self.schedule(OperationKind::Delete, engine, on_result).await
    }

    /// Names containing `fragment` (case-insensitive), ascending, at most `limit`
    pub async fn search_nodes_by_prefix(
        &self,
        fragment: &str,
        limit: usize,
        on_result: impl FnOnce(Vec<String>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        let max = self.config.max_search_limit;
        if limit == 0 || limit > max {
            return Err(ValidationError::InvalidLimit { limit, max }.into());
        }
        let query = ReadQuery::SearchNames {
            fragment: fragment.to_string(),
            limit,
        };
        self.schedule(
            OperationKind::Search,
            QueryExecutor::decoded("search_nodes", query, names_from_records),
            on_result,
        )
        .await
    }

    /// Traversal rows ordered by ascending depth, deduplicated
    pub async fn get_node_relationships(
        &self,
        name: &str,
        depth: u32,
        on_result: impl FnOnce(Vec<RelationshipRow>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        validate_name(name)?;
        if depth == 0 {
            return Err(ValidationError::InvalidDepth(depth).into());
        }
        let query = ReadQuery::NodeRelationships {
            name: name.to_string(),
            depth,
        };
        self.schedule(
            OperationKind::Relationships,
            QueryExecutor::decoded("node_relationships", query, RelationshipRow::from_records),
            on_result,
        )
        .await
    }

    /// Primary label to node names, for nodes with more than one label
    pub async fn get_label_hierarchy(
        &self,
        on_result: impl FnOnce(LabelHierarchy) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        self.schedule(
            OperationKind::Hierarchy,
            QueryExecutor::decoded(
                "label_hierarchy",
                ReadQuery::LabelHierarchy,
                label_hierarchy_from_records,
            ),
            on_result,
        )
        .await
    }

    pub async fn rename_node(
        &self,
        name: &str,
        new_name: &str,
        on_result: impl FnOnce(bool) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        let engine = RenameEngine::new(name, new_name)?;
        self.schedule(OperationKind::Rename, engine, on_result).await
    }

    /// Every node name, ascending
    pub async fn get_all_node_names(
        &self,
        on_result: impl FnOnce(Vec<String>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        self.schedule(
            OperationKind::NameCache,
            QueryExecutor::decoded("all_node_names", ReadQuery::AllNodeNames, names_from_records),
            on_result,
        )
        .await
    }

    pub async fn get_last_modified_node(
        &self,
        on_result: impl FnOnce(Option<ModifiedNode>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        self.schedule(
            OperationKind::LastModified,
            QueryExecutor::decoded(
                "last_modified_node",
                ReadQuery::LastModified,
                ModifiedNode::from_records,
            ),
            on_result,
        )
        .await
    }

    /// Run a caller-authored read statement in `slot`
    ///
    /// Statements containing write keywords or admin procedure calls are
    /// rejected before anything is scheduled.
    pub async fn execute_read_query(
        &self,
        statement: &str,
        params: PropertyMap,
        slot: OperationKind,
        on_result: impl FnOnce(Vec<Record>) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError> {
        if statement.trim().is_empty() {
            return Err(ValidationError::invalid_property("statement", "must not be empty").into());
        }
        ensure_read_only(statement)?;
        let query = ReadQuery::Raw {
            statement: statement.to_string(),
            params,
        };
        self.schedule(slot, QueryExecutor::records(query), on_result)
            .await
    }

    /// Fire-and-forget suggestion ranking for one node
    pub fn generate_suggestions<I, S>(
        &self,
        name: &str,
        labels: I,
        on_result: impl FnOnce(Suggestions) + Send + 'static,
    ) -> Result<Arc<TaskHandle>, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let engine = SuggestionEngine::new(name, labels)?;
        let executor = self.executor(engine, on_result)?;
        let handle = self.coordinator.spawn_detached(executor);
        self.admit(handle)
    }

    /// Cancel whatever runs in `kind`'s slot
    pub async fn cancel(&self, kind: &OperationKind) -> bool {
        self.coordinator.cancel(kind).await
    }

    /// Refuse new work and cancel every running task; returns how many were cancelled
    pub async fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::SeqCst);
        let cancelled = self.coordinator.cancel_all().await;
        tracing::info!(cancelled, "Graph service shut down");
        cancelled
    }
}
