use crate::catalog::types::{Row, Value};
use crate::connection::{ConnectionPool, ReactiveConnection};
use crate::error::DmlError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `rusqlite` connection driven from blocking worker threads.
#[derive(Clone)]
pub struct SqliteConnection {
    inner: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

impl SqliteConnection {
    pub fn open_in_memory() -> Result<Self, DmlError> {
        let conn = Connection::open_in_memory().map_err(DmlError::database)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DmlError> {
        let conn = Connection::open(path).map_err(DmlError::database)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(DmlError::database)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs a batch of `;`-separated statements, e.g. schema setup.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DmlError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DmlError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock();
            f(&mut *guard)
        })
        .await
        .map_err(DmlError::database)?
        .map_err(DmlError::database)
    }
}

fn to_sql(value: Value) -> SqlValue {
    match value {
        Value::Text(v) => SqlValue::Text(v.to_string()),
        Value::Integer(v) | Value::Timestamp(v) => SqlValue::Integer(v),
        Value::Float(v) => SqlValue::Real(v),
        Value::Boolean(v) => SqlValue::Integer(i64::from(v)),
        Value::Blob(v) => SqlValue::Blob(v),
        Value::Null => SqlValue::Null,
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::text(String::from_utf8_lossy(bytes).as_ref()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

#[async_trait]
impl ReactiveConnection for SqliteConnection {
    async fn execute_unprepared(&self, sql: &str) -> Result<(), DmlError> {
        self.execute_batch(sql).await
    }

    async fn execute_update(&self, sql: &str, params: Vec<Value>) -> Result<u64, DmlError> {
        let sql = sql.to_string();
        let affected = self
            .with_conn(move |conn| {
                conn.execute(&sql, params_from_iter(params.into_iter().map(to_sql)))
            })
            .await?;
        Ok(affected as u64)
    }

    async fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DmlError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let width = stmt.column_count();
            let rows = stmt
                .query_map(params_from_iter(params.into_iter().map(to_sql)), |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(from_sql))
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .map(Row::from_values)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<(), DmlError> {
        self.execute_batch("begin").await
    }

    async fn commit_transaction(&self) -> Result<(), DmlError> {
        self.execute_batch("commit").await
    }

    async fn rollback_transaction(&self) -> Result<(), DmlError> {
        self.execute_batch("rollback").await
    }
}

#[derive(Debug, Clone)]
enum PoolSource {
    File(PathBuf),
    Shared(SqliteConnection),
}

/// Hands out SQLite connections for bootstrap/shutdown DDL.
#[derive(Debug, Clone)]
pub struct SqlitePool {
    source: PoolSource,
}

impl SqlitePool {
    /// Opens a fresh connection to the database file for every request.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: PoolSource::File(path.into()),
        }
    }

    /// Always returns the same connection (in-memory databases).
    pub fn shared(conn: SqliteConnection) -> Self {
        Self {
            source: PoolSource::Shared(conn),
        }
    }
}

#[async_trait]
impl ConnectionPool for SqlitePool {
    async fn connection(&self) -> Result<Arc<dyn ReactiveConnection>, DmlError> {
        match &self.source {
            PoolSource::File(path) => {
                let path = path.clone();
                let conn = tokio::task::spawn_blocking(move || SqliteConnection::open(path))
                    .await
                    .map_err(DmlError::database)??;
                Ok(Arc::new(conn))
            }
            PoolSource::Shared(conn) => Ok(Arc::new(conn.clone())),
        }
    }
}
