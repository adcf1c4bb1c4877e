//! Node deletion
//!
//! One statement in one transaction: detach-delete the node by name. Deleting
//! a name with no matching node succeeds.

use crate::models::{validate_name, ValidationError};
use crate::operations::commit_or_rollback;
use crate::operations::task::{Operation, TaskContext};
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug)]
pub struct DeleteEngine {
    name: String,
}

impl DeleteEngine {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }
}

#[async_trait]
impl Operation for DeleteEngine {
    type Output = bool;

    fn name(&self) -> &'static str {
        "delete_node"
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<bool> {
        ctx.checkpoint()?;
        let session = ctx.session().await?;
        let mut tx = session.begin().await?;
        let outcome = match tx.detach_delete(&self.name).await {
            Ok(()) => ctx.checkpoint(),
            Err(err) => Err(err),
        };
        commit_or_rollback(tx, outcome).await?;
        tracing::info!(node = %self.name, "Node deleted");
        Ok(true)
    }
}
