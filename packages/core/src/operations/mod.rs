//! Background Operations
//!
//! Each database operation is an [`Operation`] run by a [`TaskExecutor`]:
//!
//! - [`QueryExecutor`] - read-only statements, typed by a decoder
//! - [`NodeSyncEngine`] - the atomic save of one [`NodePayload`](crate::models::NodePayload)
//! - [`DeleteEngine`] - detach-delete by name
//! - [`RenameEngine`] - rename by name

pub mod delete;
pub mod node_sync;
pub mod query_executor;
pub mod rename;
pub mod task;

pub use delete::DeleteEngine;
pub use node_sync::{NodeSyncEngine, SyncOptions, SyncReport};
pub use query_executor::{Decoder, QueryExecutor};
pub use rename::RenameEngine;
pub use task::{
    Operation, TaskCancelled, TaskContext, TaskExecutor, TaskFailure, TaskHandle, TaskState,
};

use crate::db::GraphTransaction;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};

/// RFC 3339 UTC timestamp with microseconds; sorts lexicographically
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Commit on success, roll back on failure
///
/// A failed rollback is logged; the original error is returned.
pub(crate) async fn commit_or_rollback<T>(
    tx: Box<dyn GraphTransaction>,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!("Rollback failed: {:#}", rollback_err);
            }
            Err(err)
        }
    }
}
