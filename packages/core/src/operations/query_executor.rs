//! Read-only query operation
//!
//! Opens exactly one session, runs one [`ReadQuery`], materializes every row
//! and hands the decoded value to the result callback. No partial results are
//! ever emitted: decoding happens after the last row has been read.

use crate::db::{ReadQuery, Record};
use crate::operations::task::{Operation, TaskContext};
use anyhow::Result;
use async_trait::async_trait;

/// Turns the materialized rows into the operation's typed result
pub type Decoder<T> = fn(Vec<Record>) -> Result<T>;

pub struct QueryExecutor<T> {
    name: &'static str,
    query: ReadQuery,
    decode: Decoder<T>,
}

impl QueryExecutor<Vec<Record>> {
    /// Emit the raw record sequence
    pub fn records(query: ReadQuery) -> Self {
        Self {
            name: "read_query",
            query,
            decode: Ok,
        }
    }
}

impl<T: Send + 'static> QueryExecutor<T> {
    pub fn decoded(name: &'static str, query: ReadQuery, decode: Decoder<T>) -> Self {
        Self {
            name,
            query,
            decode,
        }
    }

    pub fn query(&self) -> &ReadQuery {
        &self.query
    }
}

#[async_trait]
impl<T: Send + 'static> Operation for QueryExecutor<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<T> {
        ctx.checkpoint()?;
        let session = ctx.session().await?;
        let records = session.read(&self.query).await?;
        tracing::debug!(query = self.query.kind(), rows = records.len(), "Read complete");
        ctx.checkpoint()?;
        (self.decode)(records)
    }
}
