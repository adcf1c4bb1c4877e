//! BoltStore - GraphStore Implementation over a Bolt (Neo4j) connection
//!
//! Statement text and parameters come from [`crate::db::cypher`]; this module
//! only moves them over the wire and turns rows back into [`Record`]s.
//!
//! # Architecture
//!
//! - **One pool per handle**: each `BoltStore` owns a `neo4rs::Graph` sized by
//!   `SyncConfig::max_connections`; handles are not shared across tasks
//! - **Transactions**: [`GraphTransaction`] wraps `neo4rs::Txn`. A transaction
//!   dropped without `commit` is rolled back by the server when its
//!   connection returns to the pool
//! - **Liveness**: `verify` runs `RETURN 1`
//!
//! # Examples
//!
//! ```rust,no_run
//! use worldgraph_core::config::SyncConfig;
//! use worldgraph_core::db::{BoltConnector, ConnectionManager, ReadQuery};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = ConnectionManager::new(Arc::new(BoltConnector::new(SyncConfig::default())));
//!     let session = connection.session().await?;
//!     let names = session.read(&ReadQuery::AllNodeNames).await?;
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```

use crate::config::SyncConfig;
use crate::db::connection::Connector;
use crate::db::cypher::{self, Statement};
use crate::db::error::DatabaseError;
use crate::db::graph_store::{ExistingNode, GraphStore, GraphTransaction, ReadQuery, Record};
use crate::models::{PropertyMap, RelationshipSpec, BASE_LABEL};
use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{
    query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType,
    ConfigBuilder, Graph, Query, Row, Txn,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

const BACKEND: &str = "bolt";

/// Convert a JSON value into a Bolt parameter value
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(flag) => BoltType::Boolean(BoltBoolean::new(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => BoltType::Integer(BoltInteger::new(integer)),
            None => BoltType::Float(BoltFloat::new(number.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(text) => BoltType::String(BoltString::new(text)),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(entries) => {
            let mut map = BoltMap::new();
            for (key, item) in entries {
                map.put(BoltString::new(key), to_bolt(item));
            }
            BoltType::Map(map)
        }
    }
}

fn to_query(statement: &Statement) -> Query {
    statement
        .params
        .iter()
        .fold(query(&statement.text), |q, (key, value)| {
            q.param(key, to_bolt(value))
        })
}

fn decode(row: Row) -> Result<Record> {
    row.to::<Record>()
        .map_err(|err| DatabaseError::decode(err.to_string()).into())
}

fn count(records: &[Record], alias: &str) -> i64 {
    records
        .first()
        .and_then(|record| record.get(alias))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn driver_error(uri: &str, err: neo4rs::Error) -> DatabaseError {
    match err {
        neo4rs::Error::AuthenticationError(_) => DatabaseError::AuthenticationFailed {
            uri: uri.to_string(),
        },
        other => DatabaseError::Driver(other),
    }
}

/// Bolt connection handle
pub struct BoltStore {
    graph: Graph,
    uri: String,
}

impl BoltStore {
    /// Open a pool and verify it with one round-trip
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .fetch_size(config.fetch_size)
            .max_connections(config.max_connections);
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }
        let driver_config = builder
            .build()
            .map_err(|err| DatabaseError::connection_failed(&config.uri, err.to_string()))?;

        let graph = Graph::connect(driver_config).await.map_err(|err| match err {
            neo4rs::Error::AuthenticationError(_) => DatabaseError::AuthenticationFailed {
                uri: config.uri.clone(),
            },
            other => DatabaseError::connection_failed(&config.uri, other.to_string()),
        })?;

        let store = Self {
            graph,
            uri: config.uri.clone(),
        };
        store.verify().await?;
        Ok(store)
    }
}

#[async_trait]
impl GraphStore for BoltStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn verify(&self) -> Result<()> {
        let mut stream = self
            .graph
            .execute(query("RETURN 1 AS ok"))
            .await
            .map_err(|err| driver_error(&self.uri, err))?;
        while stream
            .next()
            .await
            .map_err(|err| driver_error(&self.uri, err))?
            .is_some()
        {}
        Ok(())
    }

    async fn read(&self, read: &ReadQuery) -> Result<Vec<Record>> {
        let statement = cypher::read_statement(read)?;
        tracing::debug!(query = read.kind(), "Running read statement");

        let mut stream = self
            .graph
            .execute(to_query(&statement))
            .await
            .map_err(DatabaseError::from)
            .with_context(|| format!("Failed to run {} query", read.kind()))?;

        let mut records = Vec::new();
        while let Some(row) = stream.next().await.map_err(DatabaseError::from)? {
            records.push(decode(row)?);
        }
        Ok(records)
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>> {
        let txn = self
            .graph
            .start_txn()
            .await
            .map_err(DatabaseError::from)
            .context("Failed to open write transaction")?;
        Ok(Box::new(BoltTransaction { txn }))
    }
}

/// Server-side write transaction
struct BoltTransaction {
    txn: Txn,
}

impl BoltTransaction {
    async fn run(&mut self, statement: Statement) -> Result<()> {
        self.txn
            .run(to_query(&statement))
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn rows(&mut self, statement: Statement) -> Result<Vec<Record>> {
        let mut stream = self
            .txn
            .execute(to_query(&statement))
            .await
            .map_err(DatabaseError::from)?;
        let mut records = Vec::new();
        while let Some(row) = stream
            .next(self.txn.handle())
            .await
            .map_err(DatabaseError::from)?
        {
            records.push(decode(row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl GraphTransaction for BoltTransaction {
    async fn fetch_existing(&mut self, name: &str) -> Result<Option<ExistingNode>> {
        let records = self.rows(cypher::fetch_existing(name)).await?;
        Ok(records.first().map(|record| ExistingNode {
            created: record
                .get("created")
                .filter(|value| !value.is_null())
                .cloned(),
        }))
    }

    async fn create_node(&mut self, name: &str, description: &str, tags: &[String]) -> Result<()> {
        self.run(cypher::create_node(name, description, tags)).await
    }

    async fn reset_properties(&mut self, name: &str, base: &PropertyMap) -> Result<()> {
        self.run(cypher::reset_properties(name, base)).await
    }

    async fn current_labels(&mut self, name: &str) -> Result<BTreeSet<String>> {
        let records = self.rows(cypher::current_labels(name)).await?;
        Ok(records
            .first()
            .and_then(|record| record.get("labels"))
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|label| *label != BASE_LABEL)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_labels(&mut self, name: &str, labels: &[String]) -> Result<()> {
        self.run(cypher::add_labels(name, labels)?).await
    }

    async fn remove_labels(&mut self, name: &str, labels: &[String]) -> Result<()> {
        self.run(cypher::remove_labels(name, labels)?).await
    }

    async fn merge_properties(&mut self, name: &str, properties: &PropertyMap) -> Result<()> {
        self.run(cypher::merge_properties(name, properties)).await
    }

    async fn delete_relationships(&mut self, name: &str) -> Result<u64> {
        let records = self.rows(cypher::delete_relationships(name)).await?;
        Ok(count(&records, "deleted").max(0) as u64)
    }

    async fn node_exists(&mut self, name: &str) -> Result<bool> {
        let records = self.rows(cypher::node_exists(name)).await?;
        Ok(count(&records, "count") > 0)
    }

    async fn create_stub(&mut self, properties: &PropertyMap) -> Result<()> {
        self.run(cypher::create_stub(properties)).await
    }

    async fn merge_relationship(
        &mut self,
        name: &str,
        relationship: &RelationshipSpec,
    ) -> Result<()> {
        let records = self
            .rows(cypher::merge_relationship(name, relationship)?)
            .await?;
        if count(&records, "merged") == 0 {
            return Err(DatabaseError::relationship_target_missing(
                name,
                &relationship.rel_type,
                &relationship.target_name,
            )
            .into());
        }
        Ok(())
    }

    async fn detach_delete(&mut self, name: &str) -> Result<()> {
        self.run(cypher::detach_delete(name)).await
    }

    async fn rename_node(&mut self, name: &str, new_name: &str, modified: &str) -> Result<bool> {
        let records = self
            .rows(cypher::rename_node(name, new_name, modified))
            .await?;
        Ok(count(&records, "renamed") > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn
            .commit()
            .await
            .map_err(DatabaseError::from)
            .context("Failed to commit transaction")?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn
            .rollback()
            .await
            .map_err(DatabaseError::from)
            .context("Failed to roll back transaction")?;
        Ok(())
    }
}

/// Opens a fresh [`BoltStore`] per connect
#[derive(Debug, Clone)]
pub struct BoltConnector {
    config: SyncConfig,
}

impl BoltConnector {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for BoltConnector {
    fn target(&self) -> String {
        self.config.uri.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn GraphStore>> {
        Ok(Arc::new(BoltStore::connect(&self.config).await?))
    }
}
