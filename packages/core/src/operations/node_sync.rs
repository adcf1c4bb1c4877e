//! Node Synchronization
//!
//! [`NodeSyncEngine`] applies one [`NodePayload`] to the graph as a single
//! write transaction. Either every step below is visible after commit, or
//! none is.
//!
//! # Steps
//!
//! 1. Fetch the existing node's `_created`
//! 2. Compute system fields: `_author` fixed, `_modified` now, `_created`
//!    preserved or now
//! 3. Create the node (base label only) if it does not exist
//! 4. Reset the base property set: `name`, `description`, `tags` and the
//!    three system fields
//! 5. Diff labels against the stored set (base label excluded); add, then
//!    remove
//! 6. Merge caller properties with system and reserved keys filtered out
//! 7. Delete every incident relationship, then merge each requested one
//! 8. Commit
//!
//! Cancellation is checked between steps and before commit. A cancelled or
//! failed save rolls back.

use crate::config::{MissingTargetPolicy, SyncConfig};
use crate::db::GraphTransaction;
use crate::models::{
    NodePayload, PropertyMap, RelationshipSpec, ValidationError, AUTHOR_KEY, CREATED_KEY,
    MODIFIED_KEY,
};
use crate::operations::task::{Operation, TaskContext};
use crate::operations::{commit_or_rollback, timestamp};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Behaviour knobs of a save
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Written to `_author`
    pub author: String,
    pub missing_target_policy: MissingTargetPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            author: config.author.clone(),
            missing_target_policy: config.missing_target_policy,
        }
    }
}

/// What a committed save changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub name: String,
    /// The node did not exist before this save
    pub created: bool,
    pub labels_added: Vec<String>,
    pub labels_removed: Vec<String>,
    pub properties_merged: usize,
    pub relationships_removed: u64,
    pub relationships_written: usize,
    /// Placeholder nodes created under [`MissingTargetPolicy::CreateStub`]
    pub stubs_created: Vec<String>,
    /// Relationships left out under [`MissingTargetPolicy::Skip`]
    pub skipped: Vec<RelationshipSpec>,
}

/// Save operation for one payload
#[derive(Debug)]
pub struct NodeSyncEngine {
    payload: NodePayload,
    options: SyncOptions,
}

impl NodeSyncEngine {
    /// Validates the payload; invalid input never becomes a task
    pub fn new(payload: NodePayload, options: SyncOptions) -> Result<Self, ValidationError> {
        payload.validate()?;
        Ok(Self { payload, options })
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    /// Run every step inside `tx`; the caller commits or rolls back
    async fn apply(&self, tx: &mut dyn GraphTransaction, ctx: &TaskContext) -> Result<SyncReport> {
        let payload = &self.payload;
        let name = payload.name.as_str();
        let now = timestamp();
        let mut report = SyncReport {
            name: name.to_string(),
            ..Default::default()
        };

        // 1-2
        let existing = tx.fetch_existing(name).await?;
        let created = existing
            .as_ref()
            .and_then(|node| node.created.clone())
            .unwrap_or_else(|| Value::from(now.as_str()));
        tracing::debug!(node = name, exists = existing.is_some(), "Fetched existing system fields");

        // 3
        if existing.is_none() {
            tx.create_node(name, &payload.description, &payload.tags).await?;
            report.created = true;
            tracing::debug!(node = name, "Created node");
        }
        ctx.checkpoint()?;

        // 4
        let mut base = PropertyMap::new();
        base.insert("name".into(), Value::from(name));
        base.insert("description".into(), Value::from(payload.description.as_str()));
        base.insert("tags".into(), Value::from(payload.tags.clone()));
        base.insert(CREATED_KEY.into(), created);
        base.insert(MODIFIED_KEY.into(), Value::from(now.as_str()));
        base.insert(AUTHOR_KEY.into(), Value::from(self.options.author.as_str()));
        tx.reset_properties(name, &base).await?;
        tracing::debug!(node = name, "Reset base properties");
        ctx.checkpoint()?;

        // 5
        let current = tx.current_labels(name).await?;
        let desired = payload.domain_labels();
        report.labels_added = desired.difference(&current).cloned().collect();
        report.labels_removed = current.difference(&desired).cloned().collect();
        if !report.labels_added.is_empty() {
            tx.add_labels(name, &report.labels_added).await?;
        }
        if !report.labels_removed.is_empty() {
            tx.remove_labels(name, &report.labels_removed).await?;
        }
        tracing::debug!(
            node = name,
            added = ?report.labels_added,
            removed = ?report.labels_removed,
            "Applied label diff"
        );
        ctx.checkpoint()?;

        // 6
        let properties = payload.user_properties();
        report.properties_merged = properties.len();
        if !properties.is_empty() {
            tx.merge_properties(name, &properties).await?;
            tracing::debug!(node = name, count = properties.len(), "Merged properties");
        }
        ctx.checkpoint()?;

        // 7
        report.relationships_removed = tx.delete_relationships(name).await?;
        for relationship in &payload.relationships {
            if self.options.missing_target_policy != MissingTargetPolicy::Abort
                && !tx.node_exists(&relationship.target_name).await?
            {
                match self.options.missing_target_policy {
                    MissingTargetPolicy::Skip => {
                        tracing::warn!(
                            node = name,
                            rel_type = %relationship.rel_type,
                            target_node = %relationship.target_name,
                            "Skipping relationship to missing node"
                        );
                        report.skipped.push(relationship.clone());
                        continue;
                    }
                    _ => {
                        tx.create_stub(&stub_properties(&relationship.target_name, &now, &self.options.author))
                            .await?;
                        tracing::warn!(
                            node = name,
                            target_node = %relationship.target_name,
                            "Created placeholder for missing relationship target"
                        );
                        report.stubs_created.push(relationship.target_name.clone());
                    }
                }
            }
            tx.merge_relationship(name, relationship).await?;
            report.relationships_written += 1;
        }
        tracing::debug!(
            node = name,
            removed = report.relationships_removed,
            written = report.relationships_written,
            "Replaced relationships"
        );
        ctx.checkpoint()?;

        Ok(report)
    }
}

fn stub_properties(name: &str, now: &str, author: &str) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert("name".into(), Value::from(name));
    properties.insert(CREATED_KEY.into(), Value::from(now));
    properties.insert(MODIFIED_KEY.into(), Value::from(now));
    properties.insert(AUTHOR_KEY.into(), Value::from(author));
    properties
}

#[async_trait]
impl Operation for NodeSyncEngine {
    type Output = SyncReport;

    fn name(&self) -> &'static str {
        "save_node"
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<SyncReport> {
        ctx.checkpoint()?;
        let session = ctx.session().await?;
        let mut tx = session.begin().await?;
        let outcome = self.apply(&mut *tx, ctx).await;
        let report = commit_or_rollback(tx, outcome).await?;
        tracing::info!(
            node = %report.name,
            created = report.created,
            relationships = report.relationships_written,
            "Node saved"
        );
        Ok(report)
    }
}
