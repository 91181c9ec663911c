mod common;

use bulkdml::BulkDmlEngine;
use bulkdml::catalog::types::Value;
use bulkdml::config::DmlConfig;
use bulkdml::connection::sqlite::{SqliteConnection, SqlitePool};
use bulkdml::sql::expr::{col, param};
use bulkdml::statement::{BulkStatement, ExecutionContext, SessionHandle};
use common::*;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sessions_only_touch_their_own_ids() {
    init_tracing();
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("animals.db");
    let setup = SqliteConnection::open(&path).expect("open");
    setup.execute_batch(ANIMAL_SCHEMA).await.expect("schema");
    seed_animals(&setup, &[4, 4, 2, 0], &[1, 3]).await;

    let engine = BulkDmlEngine::new(DmlConfig::global(), Arc::new(SqlitePool::file(&path)))
        .expect("engine");
    engine.register(animal()).expect("register");
    engine.start().await.expect("start");

    // both sessions stage before either mutates
    let gate = Arc::new(Barrier::new(2));
    let session = |legs: i64| {
        let conn = SqliteConnection::open(&path).expect("open session");
        ExecutionContext::new(SessionHandle::new(GatedConnection::new(conn, gate.clone())))
            .with_params(vec![Value::Integer(legs)])
    };
    let four_legs = session(4);
    let two_legs = session(2);

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let (a, b) = tokio::join!(
        engine.execute(&statement, &four_legs),
        engine.execute(&statement, &two_legs)
    );

    assert_eq!(a.expect("four legs"), 2);
    assert_eq!(b.expect("two legs"), 1);
    assert_eq!(count(&setup, "animal").await, 1);
    assert_eq!(count(&setup, "animal_tags").await, 1);
    assert_eq!(count(&setup, "ht_animal").await, 0);

    engine.shutdown().await.expect("shutdown");
    assert!(!table_exists(&setup, "ht_animal").await);
}

#[tokio::test]
async fn rows_from_another_session_are_invisible() {
    let conn = memory_db(ANIMAL_SCHEMA).await;
    seed_animals(&conn, &[4, 4, 2], &[]).await;
    let engine = engine(DmlConfig::global(), &conn, vec![animal()]);
    engine.start().await.expect("start");

    // a stray row left behind by some other session
    conn.execute_batch("insert into ht_animal (id, session_uid) values (3, 'someone-else');")
        .await
        .expect("foreign staging row");

    let statement =
        BulkStatement::delete("Animal").with_restriction(col("mammal", "legs").eq(param(0)));
    let rows = engine
        .execute(&statement, &context(&conn, vec![Value::Integer(4)]))
        .await
        .expect("delete");

    assert_eq!(rows, 2);
    assert_eq!(count(&conn, "animal").await, 1);
    assert_eq!(
        scalar(&conn, "select count(*) from ht_animal where session_uid = 'someone-else'").await,
        1
    );
}
