//! Downstream seam: the non-blocking connection the engine issues SQL through.

pub mod sqlite;

use crate::catalog::types::{Row, Value};
use crate::error::DmlError;
use async_trait::async_trait;
use std::sync::Arc;

/// A single database connection whose operations complete asynchronously.
///
/// Implementations must not block the runtime thread; drivers with a blocking
/// API move the call onto a blocking worker.
#[async_trait]
pub trait ReactiveConnection: Send + Sync {
    /// Executes a statement without parameters or a result (DDL).
    async fn execute_unprepared(&self, sql: &str) -> Result<(), DmlError>;

    /// Executes a mutation and returns the affected row count.
    async fn execute_update(&self, sql: &str, params: Vec<Value>) -> Result<u64, DmlError>;

    async fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DmlError>;

    async fn begin_transaction(&self) -> Result<(), DmlError>;

    async fn commit_transaction(&self) -> Result<(), DmlError>;

    async fn rollback_transaction(&self) -> Result<(), DmlError>;
}

/// Source of connections for work that is not tied to a caller's session,
/// such as bootstrap and shutdown DDL.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn connection(&self) -> Result<Arc<dyn ReactiveConnection>, DmlError>;
}
