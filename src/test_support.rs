//! Scripted connection doubles for unit tests.

use crate::catalog::types::{Row, Value};
use crate::connection::{ConnectionPool, ReactiveConnection};
use crate::error::DmlError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Recorded {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

/// Records every statement, answers mutations with scripted counts and fails
/// statements containing a configured fragment.
#[derive(Default)]
pub(crate) struct ScriptedConnection {
    log: Mutex<Vec<Recorded>>,
    failures: Mutex<Vec<String>>,
    counts: Mutex<Vec<(String, u64)>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedConnection {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_on(self: Arc<Self>, fragment: &str) -> Arc<Self> {
        self.failures.lock().push(fragment.to_string());
        self
    }

    pub(crate) fn returning(self: Arc<Self>, fragment: &str, count: u64) -> Arc<Self> {
        self.counts.lock().push((fragment.to_string(), count));
        self
    }

    pub(crate) fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock() = Some(latency);
        self
    }

    pub(crate) fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|r| r.sql.clone()).collect()
    }

    pub(crate) fn count_matching(&self, fragment: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.sql.contains(fragment))
            .count()
    }

    async fn record(&self, sql: &str, params: Vec<Value>) -> Result<(), DmlError> {
        self.log.lock().push(Recorded {
            sql: sql.to_string(),
            params,
        });
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failing = self.failures.lock().iter().any(|f| sql.contains(f.as_str()));
        if failing {
            return Err(DmlError::database(std::io::Error::other(format!(
                "scripted failure: {sql}"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl ReactiveConnection for ScriptedConnection {
    async fn execute_unprepared(&self, sql: &str) -> Result<(), DmlError> {
        self.record(sql, Vec::new()).await
    }

    async fn execute_update(&self, sql: &str, params: Vec<Value>) -> Result<u64, DmlError> {
        self.record(sql, params).await?;
        let count = self
            .counts
            .lock()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, count)| *count)
            .unwrap_or(0);
        Ok(count)
    }

    async fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DmlError> {
        self.record(sql, params).await?;
        Ok(Vec::new())
    }

    async fn begin_transaction(&self) -> Result<(), DmlError> {
        self.record("begin", Vec::new()).await
    }

    async fn commit_transaction(&self) -> Result<(), DmlError> {
        self.record("commit", Vec::new()).await
    }

    async fn rollback_transaction(&self) -> Result<(), DmlError> {
        self.record("rollback", Vec::new()).await
    }
}

pub(crate) struct ScriptedPool {
    conn: Arc<ScriptedConnection>,
}

impl ScriptedPool {
    pub(crate) fn new(conn: Arc<ScriptedConnection>) -> Arc<Self> {
        Arc::new(Self { conn })
    }
}

#[async_trait]
impl ConnectionPool for ScriptedPool {
    async fn connection(&self) -> Result<Arc<dyn ReactiveConnection>, DmlError> {
        Ok(self.conn.clone())
    }
}
