//! Node rename
//!
//! Renames keep the node's identity, labels and relationships; only `name`
//! changes and `_modified` is stamped. The new name must be free.

use crate::db::DatabaseError;
use crate::models::{validate_name, ValidationError};
use crate::operations::task::{Operation, TaskContext};
use crate::operations::{commit_or_rollback, timestamp};
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug)]
pub struct RenameEngine {
    name: String,
    new_name: String,
}

impl RenameEngine {
    pub fn new(
        name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let new_name = new_name.into();
        validate_name(&name)?;
        validate_name(&new_name)?;
        Ok(Self { name, new_name })
    }
}

#[async_trait]
impl Operation for RenameEngine {
    /// Whether a node was renamed
    type Output = bool;

    fn name(&self) -> &'static str {
        "rename_node"
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<bool> {
        ctx.checkpoint()?;
        let session = ctx.session().await?;
        let mut tx = session.begin().await?;

        let outcome: Result<bool> = async {
            if self.name == self.new_name {
                return tx.node_exists(&self.name).await;
            }
            if tx.node_exists(&self.new_name).await? {
                return Err(DatabaseError::name_taken(&self.new_name).into());
            }
            let renamed = tx
                .rename_node(&self.name, &self.new_name, &timestamp())
                .await?;
            ctx.checkpoint()?;
            Ok(renamed)
        }
        .await;

        let renamed = commit_or_rollback(tx, outcome).await?;
        tracing::info!(from = %self.name, to = %self.new_name, renamed, "Rename finished");
        Ok(renamed)
    }
}
