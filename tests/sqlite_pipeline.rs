mod common;

use bulkdml::catalog::types::Value;
use bulkdml::config::DmlConfig;
use bulkdml::error::DmlErrorCode;
use bulkdml::sql::expr::{col, lit, param};
use bulkdml::statement::{BulkStatement, ExecutionOptions};
use bulkdml::sync_bridge::BulkDmlSync;
use common::*;
use std::sync::Arc;

const LOCK_SECOND_ANIMAL: &str = "
    create trigger animal_locked before delete on animal
    when old.name = 'animal-2'
    begin select raise(abort, 'animal-2 is locked'); end;
";

async fn seed_pigs(conn: &bulkdml::connection::sqlite::SqliteConnection, n: i64) {
    let sql: String = (0..n)
        .map(|id| format!("insert into pig (id, name) values ({id}, 'pig-{id}');"))
        .collect();
    conn.execute_batch(&sql).await.expect("seed pigs");
}

#[tokio::test]
async fn single_table_delete_runs_directly() {
    init_tracing();
    let conn = memory_db(PIG_SCHEMA).await;
    seed_pigs(&conn, 150).await;
    let engine = engine(DmlConfig::global(), &conn, vec![pig()]);

    let statement = BulkStatement::delete("Pig").with_restriction(col("pig", "id").lt(param(0)));
    let rows = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(100)]))
        .await
        .expect("delete");

    assert_eq!(rows, 100);
    assert_eq!(count(&conn, "pig").await, 50);
    assert!(!table_exists(&conn, "ht_pig").await);
    assert_eq!(engine.metrics().restricted_statements, 1);
}

#[tokio::test]
async fn single_table_update_runs_directly() {
    let conn = memory_db(PIG_SCHEMA).await;
    seed_pigs(&conn, 150).await;
    let engine = engine(DmlConfig::global(), &conn, vec![pig()]);

    let statement = BulkStatement::update("Pig", vec![col("pig", "name").set(lit("renamed"))])
        .with_restriction(col("pig", "id").lt(param(0)));
    let rows = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(100)]))
        .await
        .expect("update");

    assert_eq!(rows, 100);
    assert_eq!(
        scalar(&conn, "select count(*) from pig where name = 'renamed'").await,
        100
    );
    assert!(!table_exists(&conn, "ht_pig").await);
    let metrics = engine.metrics();
    assert_eq!(metrics.restricted_statements, 1);
    assert_eq!(metrics.staged_statements, 0);
}

#[tokio::test]
async fn optional_table_update_inserts_missing_rows() {
    init_tracing();
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 4, 2, 2], &[1, 2, 3]).await;
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    let statement =
        BulkStatement::update("Animal", vec![col("animal_details", "color").set(lit("brown"))]);
    let rows = engine
        .execute(&statement, &context(&conn, Vec::new()))
        .await
        .expect("update");

    assert_eq!(rows, 5);
    assert_eq!(count(&conn, "animal_details").await, 5);
    assert_eq!(
        scalar(&conn, "select count(*) from animal_details where color = 'brown'").await,
        5
    );
    assert_eq!(count(&conn, "ht_animal").await, 0);
    let metrics = engine.metrics();
    assert_eq!(metrics.compensating_inserts, 1);
    assert_eq!(metrics.rows_compensated, 2);
}

#[tokio::test]
async fn joined_delete_removes_dependents_and_collections() {
    init_tracing();
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 2, 0], &[1, 3]).await;
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let rows = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(4)]))
        .await
        .expect("delete");

    assert_eq!(rows, 2);
    assert_eq!(count(&conn, "animal").await, 2);
    assert_eq!(count(&conn, "mammal").await, 2);
    assert_eq!(count(&conn, "animal_details").await, 1);
    assert_eq!(count(&conn, "animal_tags").await, 2);
    assert_eq!(count(&conn, "ht_animal").await, 0);
}

#[tokio::test]
async fn empty_match_short_circuits() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 2], &[]).await;
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    let statement = BulkStatement::update("Animal", vec![col("animal_details", "color").set(lit("red"))])
        .with_restriction(col("mammal", "legs").eq(param(0)));
    let rows = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(8)]))
        .await
        .expect("update");
    assert_eq!(rows, 0);
    assert_eq!(count(&conn, "animal_details").await, 0);
}

#[tokio::test]
async fn failed_statement_still_cleans_staging_rows() {
    init_tracing();
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 2], &[]).await;
    conn.execute_batch(LOCK_SECOND_ANIMAL).await.expect("trigger");
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let err = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(4)]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), DmlErrorCode::Database);
    assert!(err.to_string().contains("locked"));
    assert_eq!(count(&conn, "animal").await, 3);
    // dependent steps that ran before the failure stay applied
    assert_eq!(count(&conn, "animal_tags").await, 1);
    assert_eq!(count(&conn, "ht_animal").await, 0);
    assert_eq!(engine.metrics().statement_errors, 1);
}

#[tokio::test]
async fn transactional_failure_leaves_tables_untouched() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 2], &[1]).await;
    conn.execute_batch(LOCK_SECOND_ANIMAL).await.expect("trigger");
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let ctx = context(&conn, vec![Value::Integer(4)]).with_options(ExecutionOptions {
        transactional: true,
        ..ExecutionOptions::default()
    });
    let err = engine.execute(&statement, &ctx).await.unwrap_err();

    assert_eq!(err.code(), DmlErrorCode::Database);
    assert_eq!(count(&conn, "animal").await, 3);
    assert_eq!(count(&conn, "mammal").await, 3);
    assert_eq!(count(&conn, "animal_details").await, 1);
    assert_eq!(count(&conn, "animal_tags").await, 3);
    assert!(table_exists(&conn, "ht_animal").await);
    assert_eq!(count(&conn, "ht_animal").await, 0);
}

#[tokio::test]
async fn transactional_success_commits() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 2], &[]).await;
    let engine = engine(DmlConfig::local(), &conn, vec![animal()]);

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let ctx = context(&conn, vec![Value::Integer(2)]).with_options(ExecutionOptions {
        transactional: true,
        ..ExecutionOptions::default()
    });
    assert_eq!(engine.execute(&statement, &ctx).await.expect("delete"), 1);
    assert_eq!(count(&conn, "animal").await, 1);
    assert_eq!(
        scalar(&conn, "select count(*) from sqlite_temp_master where name = 'ht_animal'").await,
        0
    );
}

#[tokio::test]
async fn local_scope_removes_its_table_after_each_statement() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 2, 0], &[]).await;
    let engine = engine(DmlConfig::local(), &conn, vec![animal()]);

    for (legs, expected) in [(4, 2), (2, 1)] {
        let statement =
            BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
        let rows = engine
            .execute(&statement, &context(&conn, vec![Value::Integer(legs)]))
            .await
            .expect("delete");
        assert_eq!(rows, expected);
        assert_eq!(
            scalar(&conn, "select count(*) from sqlite_temp_master where name = 'ht_animal'").await,
            0
        );
    }
    assert_eq!(count(&conn, "animal").await, 1);
}

#[tokio::test]
async fn staging_lifecycle_is_idempotent() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);

    engine.start().await.expect("start");
    engine.start().await.expect("start again");
    assert!(table_exists(&conn, "ht_animal").await);

    engine.shutdown().await.expect("shutdown");
    engine.shutdown().await.expect("shutdown again");
    assert!(!table_exists(&conn, "ht_animal").await);

    let metrics = engine.metrics();
    assert_eq!(metrics.staging_tables_created, 1);
    assert_eq!(metrics.staging_tables_dropped, 1);

    let err = engine
        .execute(&BulkStatement::delete("Animal"), &context(&conn, Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), DmlErrorCode::Unavailable);
}

#[tokio::test]
async fn persistent_scope_keeps_table_when_drop_is_disabled() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    let config = DmlConfig {
        drop_on_shutdown: false,
        ..DmlConfig::persistent()
    };
    let engine = engine(config, &conn, vec![animal()]);
    engine.start().await.expect("start");
    engine.shutdown().await.expect("shutdown");
    assert!(table_exists(&conn, "ht_animal").await);
}

#[test]
fn blocking_facade_drives_the_engine() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let conn = rt.block_on(memory_db(PIG_SCHEMA));
    rt.block_on(seed_pigs(&conn, 10));
    let engine = Arc::new(engine(DmlConfig::global(), &conn, vec![pig()]));
    let sync = BulkDmlSync::new(engine, rt.handle().clone());

    sync.start().expect("start");
    let statement = BulkStatement::delete("Pig").with_restriction(col("pig", "id").gte(param(0)));
    let rows = sync
        .execute(&statement, &context(&conn, vec![Value::Integer(7)]))
        .expect("delete");
    assert_eq!(rows, 3);
    assert_eq!(sync.metrics().statements_total, 1);
    sync.shutdown().expect("shutdown");
}
