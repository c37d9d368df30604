use std::sync::Arc;

use bytes::Bytes;
use notes_query_cache::cache::{
    CacheConfig, CacheSource, DateMode, Domain, Executor, NumericKind, NumericView, Outcome, Param,
    resolve,
};
use notes_query_cache::infra::db::{QueryRows, SqliteExecutor, connect, ensure_schema, health_check};
use notes_query_cache::infra::error::InfraError;
use serde_json::json;
use sqlx::SqlitePool;
use time::macros::datetime;

async fn memory_pool() -> SqlitePool {
    let pool = connect("sqlite::memory:", 1).await.expect("in-memory pool");
    ensure_schema(&pool).await.expect("schema");
    pool
}

async fn count(domain: &Domain, source: &CacheSource<SqliteExecutor>) -> Arc<QueryRows> {
    resolve(
        || {
            domain
                .query(source, "select count(*) as n from notes", &[])?
                .into_ready()
        },
        8,
    )
    .await
    .expect("count resolves")
}

#[tokio::test]
async fn schema_setup_is_idempotent() {
    let pool = memory_pool().await;
    ensure_schema(&pool).await.expect("second run");
    health_check(&pool).await.expect("pool answers");
}

#[tokio::test]
async fn rows_decode_by_storage_class() {
    let pool = memory_pool().await;
    let executor = SqliteExecutor::new(pool, DateMode::Utc);

    let rows = executor
        .execute(
            "select 7 as i, 0.5 as r, 'note' as t, x'0aff' as b, null as empty",
            &[],
        )
        .await
        .expect("query runs");

    assert_eq!(rows.len(), 1);
    let row = rows.first().expect("one row");
    assert_eq!(row["i"], json!(7));
    assert_eq!(row["r"], json!(0.5));
    assert_eq!(row["t"], json!("note"));
    assert_eq!(row["b"], json!("0aff"));
    assert_eq!(row["empty"], json!(null));
}

#[tokio::test]
async fn parameters_bind_positionally() {
    let pool = memory_pool().await;
    let executor = SqliteExecutor::new(pool, DateMode::Utc);
    let view = NumericView::new(NumericKind::U8, Bytes::from_static(&[1, 2, 3, 4]), 1, 2)
        .expect("view fits");

    let rows = executor
        .execute(
            "select ?1 as flag, ?2 as n, ?3 as blob, ?4 as at, ?5 as list, ?6 as missing",
            &[
                Param::Bool(true),
                Param::Int(42),
                Param::View(view),
                Param::DateTime(datetime!(2024-05-01 08:30:00 UTC)),
                Param::from(json!(["a", null])),
                Param::Null,
            ],
        )
        .await
        .expect("query runs");

    let row = rows.first().expect("one row");
    assert_eq!(row["flag"], json!(1));
    assert_eq!(row["n"], json!(42));
    assert_eq!(row["blob"], json!("0203"));
    assert_eq!(row["at"], json!("2024-05-01T08:30:00.000+00:00"));
    assert_eq!(row["list"], json!(r#"{"a",NULL}"#));
    assert_eq!(row["missing"], json!(null));
}

#[tokio::test]
async fn sql_errors_are_database_errors() {
    let pool = memory_pool().await;
    let executor = SqliteExecutor::new(pool, DateMode::Utc);

    let error = executor
        .execute("select * from nowhere", &[])
        .await
        .unwrap_err();
    assert!(matches!(error, InfraError::Database { message } if message.contains("nowhere")));
}

#[tokio::test]
async fn cached_reads_see_one_snapshot_per_domain() {
    let pool = memory_pool().await;
    let source = CacheSource::new("notes", SqliteExecutor::new(pool.clone(), DateMode::Utc));
    sqlx::query("insert into notes (title, body) values ('first', 'a')")
        .execute(&pool)
        .await
        .expect("insert");

    let domain = Domain::begin(&CacheConfig::default());
    assert_eq!(count(&domain, &source).await.rows[0]["n"], json!(1));

    sqlx::query("insert into notes (title, body) values ('second', 'b')")
        .execute(&pool)
        .await
        .expect("insert");
    assert_eq!(count(&domain, &source).await.rows[0]["n"], json!(1));

    let next = Domain::begin(&CacheConfig::default());
    assert_eq!(count(&next, &source).await.rows[0]["n"], json!(2));
}

#[tokio::test]
async fn first_read_through_the_cache_suspends() {
    let pool = memory_pool().await;
    let source = CacheSource::new("notes", SqliteExecutor::new(pool, DateMode::Utc));
    let domain = Domain::begin(&CacheConfig::default());

    let Outcome::Suspend(handle) = domain
        .query(&source, "select * from notes order by id desc", &[])
        .expect("valid query")
    else {
        panic!("first read must suspend");
    };
    handle.await;

    let rows = domain
        .query(&source, "select * from notes order by id desc", &[])
        .expect("valid query");
    assert!(rows.value().expect("resolved").is_empty());
}

#[tokio::test]
async fn connect_creates_a_missing_database_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("notes.db");
    let url = format!("sqlite://{}", path.display());

    let pool = connect(&url, 2).await.expect("file pool");
    ensure_schema(&pool).await.expect("schema");
    assert!(path.exists());
    pool.close().await;
}
