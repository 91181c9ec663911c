#![allow(dead_code)]

use async_trait::async_trait;
use bulkdml::BulkDmlEngine;
use bulkdml::catalog::MutationTarget;
use bulkdml::catalog::schema::{KeyColumn, RootTable};
use bulkdml::catalog::types::{ColumnType, Row, Value};
use bulkdml::config::DmlConfig;
use bulkdml::connection::ReactiveConnection;
use bulkdml::connection::sqlite::{SqliteConnection, SqlitePool};
use bulkdml::error::DmlError;
use bulkdml::statement::{ExecutionContext, SessionHandle};
use std::sync::Arc;
use tokio::sync::Barrier;

pub const ANIMAL_SCHEMA: &str = "
    pragma foreign_keys = on;
    create table animal (id integer primary key, name text not null, weight integer not null);
    create table mammal (animal_id integer primary key references animal(id), legs integer not null);
    create table animal_details (animal_id integer primary key references animal(id), color text);
    create table animal_tags (animal_id integer not null references animal(id), tag text not null);
";

pub const PIG_SCHEMA: &str = "create table pig (id integer primary key, name text not null);";

pub const VEHICLE_SCHEMA: &str = "
    create table car (id integer primary key, wheels integer not null, label text);
    create table truck (id integer primary key, wheels integer not null, label text);
";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn pig() -> MutationTarget {
    MutationTarget::single_table("Pig", "pig", KeyColumn::new("id", ColumnType::Integer))
}

pub fn animal() -> MutationTarget {
    MutationTarget::single_table("Animal", "animal", KeyColumn::new("id", ColumnType::Integer))
        .with_subclass_table("mammal", &["animal_id"])
        .with_secondary_table("animal_details", &["animal_id"], true)
        .with_collection_table("animal_tags", &["animal_id"])
}

pub fn vehicle() -> MutationTarget {
    MutationTarget::union_of_leaves(
        "Vehicle",
        RootTable::new("vehicle", vec![KeyColumn::new("id", ColumnType::Integer)]),
        vec!["car".into(), "truck".into()],
    )
}

pub async fn memory_db(schema: &str) -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory().expect("open sqlite");
    conn.execute_batch(schema).await.expect("schema");
    conn
}

pub fn engine(config: DmlConfig, conn: &SqliteConnection, targets: Vec<MutationTarget>) -> BulkDmlEngine {
    let engine =
        BulkDmlEngine::new(config, Arc::new(SqlitePool::shared(conn.clone()))).expect("engine");
    for target in targets {
        engine.register(target).expect("register");
    }
    engine
}

pub fn context(conn: &SqliteConnection, params: Vec<Value>) -> ExecutionContext {
    ExecutionContext::new(SessionHandle::new(Arc::new(conn.clone()))).with_params(params)
}

pub async fn query(conn: &dyn ReactiveConnection, sql: &str) -> Vec<Row> {
    conn.select(sql, Vec::new()).await.expect("select")
}

pub async fn scalar(conn: &dyn ReactiveConnection, sql: &str) -> i64 {
    let rows = query(conn, sql).await;
    match rows.first().and_then(|r| r.get(0)) {
        Some(Value::Integer(v)) => *v,
        other => panic!("expected an integer from {sql:?}, got {other:?}"),
    }
}

pub async fn count(conn: &dyn ReactiveConnection, table: &str) -> i64 {
    scalar(conn, &format!("select count(*) from {table}")).await
}

pub async fn table_exists(conn: &dyn ReactiveConnection, table: &str) -> bool {
    let sql = format!(
        "select count(*) from sqlite_master where type = 'table' and name = '{table}'"
    );
    scalar(conn, &sql).await > 0
}

/// Seeds animals `1..=legs.len()`, each a mammal with the given leg count and
/// one tag. Animals whose index is listed in `with_details` get a details row.
pub async fn seed_animals(conn: &SqliteConnection, legs: &[i64], with_details: &[i64]) {
    let mut sql = String::new();
    for (i, legs) in legs.iter().enumerate() {
        let id = i as i64 + 1;
        sql.push_str(&format!(
            "insert into animal (id, name, weight) values ({id}, 'animal-{id}', {});",
            id * 10
        ));
        sql.push_str(&format!("insert into mammal (animal_id, legs) values ({id}, {legs});"));
        sql.push_str(&format!("insert into animal_tags (animal_id, tag) values ({id}, 'tag-{id}');"));
    }
    for id in with_details {
        sql.push_str(&format!(
            "insert into animal_details (animal_id, color) values ({id}, 'grey');"
        ));
    }
    conn.execute_batch(&sql).await.expect("seed animals");
}

/// Delegates to a SQLite connection and holds every session at a barrier
/// right after it has staged its ids.
pub struct GatedConnection {
    inner: SqliteConnection,
    gate: Arc<Barrier>,
}

impl GatedConnection {
    pub fn new(inner: SqliteConnection, gate: Arc<Barrier>) -> Arc<Self> {
        Arc::new(Self { inner, gate })
    }
}

#[async_trait]
impl ReactiveConnection for GatedConnection {
    async fn execute_unprepared(&self, sql: &str) -> Result<(), DmlError> {
        self.inner.execute_unprepared(sql).await
    }

    async fn execute_update(&self, sql: &str, params: Vec<Value>) -> Result<u64, DmlError> {
        let affected = self.inner.execute_update(sql, params).await?;
        if sql.starts_with("insert into ht_") {
            self.gate.wait().await;
        }
        Ok(affected)
    }

    async fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DmlError> {
        self.inner.select(sql, params).await
    }

    async fn begin_transaction(&self) -> Result<(), DmlError> {
        self.inner.begin_transaction().await
    }

    async fn commit_transaction(&self) -> Result<(), DmlError> {
        self.inner.commit_transaction().await
    }

    async fn rollback_transaction(&self) -> Result<(), DmlError> {
        self.inner.rollback_transaction().await
    }
}
