//! Service Layer Error Types
//!
//! Errors returned synchronously by [`GraphService`](super::GraphService)
//! scheduling calls. Operational failures never appear here; they are
//! delivered once through the error callback as a
//! [`TaskFailure`](crate::operations::TaskFailure).

use crate::models::ValidationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The request was rejected before any background task was created
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// The service was shut down; no new tasks are accepted
    #[error("Graph service has been shut down")]
    ShutDown,
}

impl ServiceError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }
}
