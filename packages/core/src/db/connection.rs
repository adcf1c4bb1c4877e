//! Connection Management
//!
//! [`ConnectionManager`] owns one lazily-created connection handle and hands
//! out sessions bound to it. Every background task constructs its own manager,
//! so handles are never shared between tasks.
//!
//! # Architecture
//!
//! - **Connector seam**: a [`Connector`] knows how to open a fresh handle
//!   (`BoltConnector` for a server, `MemoryGraph` in-process)
//! - **Verify and reconnect**: [`ConnectionManager::ensure_connection`]
//!   checks liveness and reconnects once on failure, logging a warning; only
//!   a failed reconnect is surfaced
//! - **Idempotent close**: closing twice, or closing a manager that never
//!   connected, is a no-op

use crate::db::error::DatabaseError;
use crate::db::graph_store::{GraphStore, Session};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Factory for fresh connection handles
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint description for logs, free of credentials
    fn target(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn GraphStore>>;
}

/// Owns at most one connection handle
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Arc<dyn GraphStore>>>,
}

impl ConnectionManager {
    /// No side effects until the first `connect`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
        }
    }

    /// Create the handle if none exists
    pub async fn connect(&self) -> Result<Arc<dyn GraphStore>> {
        let mut handle = self.handle.lock().await;
        if let Some(existing) = handle.as_ref() {
            return Ok(existing.clone());
        }
        let store = self.open().await?;
        *handle = Some(store.clone());
        Ok(store)
    }

    /// Return a verified handle, reconnecting once if the current one is stale
    pub async fn ensure_connection(&self) -> Result<Arc<dyn GraphStore>> {
        let mut handle = self.handle.lock().await;

        if let Some(existing) = handle.as_ref() {
            match existing.verify().await {
                Ok(()) => return Ok(existing.clone()),
                Err(err) => {
                    let auth_failure = err
                        .downcast_ref::<DatabaseError>()
                        .is_some_and(DatabaseError::is_authentication_failure);
                    if auth_failure {
                        return Err(err);
                    }
                    tracing::warn!(
                        endpoint = %self.connector.target(),
                        error = %err,
                        "Connection verification failed, reconnecting"
                    );
                    if let Some(stale) = handle.take() {
                        if let Err(close_err) = stale.close().await {
                            tracing::debug!("Ignoring error closing stale handle: {}", close_err);
                        }
                    }
                }
            }
        }

        let store = self.open().await?;
        *handle = Some(store.clone());
        Ok(store)
    }

    /// A new logical session bound to a verified handle
    pub async fn session(&self) -> Result<Session> {
        Ok(Session::new(self.ensure_connection().await?))
    }

    /// Release the handle; safe to call repeatedly
    pub async fn close(&self) -> Result<()> {
        let Some(store) = self.handle.lock().await.take() else {
            return Ok(());
        };
        store.close().await?;
        tracing::info!(endpoint = %self.connector.target(), "Graph connection closed");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn open(&self) -> Result<Arc<dyn GraphStore>> {
        let store = self.connector.connect().await?;
        tracing::info!(
            endpoint = %self.connector.target(),
            backend = store.backend(),
            "Graph connection created"
        );
        Ok(store)
    }
}
