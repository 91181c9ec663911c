use bulkdml::BulkDmlEngine;
use bulkdml::catalog::MutationTarget;
use bulkdml::catalog::schema::KeyColumn;
use bulkdml::catalog::types::{ColumnType, Value};
use bulkdml::config::DmlConfig;
use bulkdml::connection::sqlite::{SqliteConnection, SqlitePool};
use bulkdml::mutation::planner::build_plan;
use bulkdml::sql::Dialect;
use bulkdml::sql::expr::{col, lit, param};
use bulkdml::staging::StagingTable;
use bulkdml::statement::{BulkStatement, ExecutionContext, ExecutionOptions, SessionHandle};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

const ANIMALS: i64 = 2_000;

fn animal() -> MutationTarget {
    MutationTarget::single_table("Animal", "animal", KeyColumn::new("id", ColumnType::Integer))
        .with_subclass_table("mammal", &["animal_id"])
        .with_secondary_table("animal_details", &["animal_id"], true)
        .with_collection_table("animal_tags", &["animal_id"])
}

fn joined_update() -> BulkStatement {
    BulkStatement::update("Animal", vec![col("animal_details", "color").set(lit("brown"))])
        .with_restriction(col("mammal", "legs").eq(param(0)).and(col("animal", "weight").gt(param(1))))
}

async fn seeded_db() -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory().expect("open");
    let mut sql = String::from(
        "create table animal (id integer primary key, weight integer not null);
         create table mammal (animal_id integer primary key, legs integer not null);
         create table animal_details (animal_id integer primary key, color text);
         create table animal_tags (animal_id integer not null, tag text not null);",
    );
    for id in 0..ANIMALS {
        sql.push_str(&format!(
            "insert into animal values ({id}, {});insert into mammal values ({id}, {});",
            id % 100,
            id % 5
        ));
        if id % 2 == 0 {
            sql.push_str(&format!("insert into animal_details values ({id}, 'grey');"));
        }
    }
    conn.execute_batch(&sql).await.expect("seed");
    conn
}

fn bench_planning(c: &mut Criterion) {
    let target = animal();
    let config = DmlConfig::global();
    let dialect = Dialect::sqlite();
    let staging = StagingTable::for_target(&target, &config, &dialect);
    let statement = joined_update();

    c.bench_function("build_staged_update_plan", |b| {
        b.iter(|| {
            build_plan(&target, black_box(&statement), &staging, &dialect, false).expect("plan")
        })
    });

    let conn = SqliteConnection::open_in_memory().expect("open");
    let engine = BulkDmlEngine::new(config, Arc::new(SqlitePool::shared(conn))).expect("engine");
    engine.register(target.clone()).expect("register");
    let options = ExecutionOptions::default();
    c.bench_function("cached_plan_lookup", |b| {
        b.iter(|| engine.plan(black_box(&statement), &options).expect("plan"))
    });
}

fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let conn = rt.block_on(seeded_db());
    let engine = BulkDmlEngine::new(DmlConfig::global(), Arc::new(SqlitePool::shared(conn.clone())))
        .expect("engine");
    engine.register(animal()).expect("register");
    rt.block_on(engine.start()).expect("start");

    let statement = joined_update();
    let mut legs = 0_i64;
    c.bench_function("staged_update_sqlite", |b| {
        b.iter(|| {
            legs = (legs + 1) % 5;
            let ctx = ExecutionContext::new(SessionHandle::new(Arc::new(conn.clone())))
                .with_params(vec![Value::Integer(legs), Value::Integer(black_box(50))]);
            rt.block_on(engine.execute(&statement, &ctx)).expect("update")
        })
    });
    rt.block_on(engine.shutdown()).expect("shutdown");
}

criterion_group!(benches, bench_planning, bench_execution);
criterion_main!(benches);
