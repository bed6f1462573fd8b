//! Isolated-schema integration tests against a real Postgres. Each test
//! creates its own uniquely-named schema, exercises the adapter under test,
//! and drops the schema on the way out — the per-schema analogue of
//! `sem_os_harness::db::isolated_db`'s per-database isolation, since this
//! crate's unit of isolation is a schema rather than a whole database.
//!
//! Requires `DATABASE_URL` to point at a reachable Postgres; `#[ignore]`d so
//! `cargo test` is safe to run without one (run with `cargo test -- --ignored`
//! against a real database to exercise these).

use harness_core::ports::{NamespaceHandler, SnapshotStore};
use harness_postgres::{PgNamespaceHandler, PgSnapshotStore};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored DB tests");
    PgPool::connect(&url).await.expect("failed to connect to test database")
}

fn unique_schema(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

async fn seed_source_schema(pool: &PgPool, schema: &str) {
    sqlx::query(&format!("CREATE SCHEMA {schema}")).execute(pool).await.unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {schema}.messages (id uuid PRIMARY KEY, channel text NOT NULL, message_text text NOT NULL)"
    ))
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        "INSERT INTO {schema}.messages (id, channel, message_text) VALUES ($1, 'C1', 'seed')"
    ))
    .bind(Uuid::new_v4())
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
#[ignore]
async fn clone_preserves_rows_and_foreign_keys() {
    let pool = test_pool().await;
    let handler = PgNamespaceHandler::new(pool.clone());
    let source = unique_schema("tpl_clone_src");
    let target = unique_schema("state_clone_tgt");

    sqlx::query(&format!("CREATE SCHEMA {source}")).execute(&pool).await.unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {source}.channels (id uuid PRIMARY KEY, name text NOT NULL)"
    ))
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {source}.messages (\
            id uuid PRIMARY KEY, channel_id uuid NOT NULL REFERENCES {source}.channels (id), \
            message_text text NOT NULL)"
    ))
    .execute(&pool)
    .await
    .unwrap();
    let channel_id = Uuid::new_v4();
    sqlx::query(&format!("INSERT INTO {source}.channels (id, name) VALUES ($1, 'general')"))
        .bind(channel_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        "INSERT INTO {source}.messages (id, channel_id, message_text) VALUES ($1, $2, 'hello')"
    ))
    .bind(Uuid::new_v4())
    .bind(channel_id)
    .execute(&pool)
    .await
    .unwrap();

    handler.clone_namespace(&source, &target).await.unwrap();

    let (count,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {target}.messages"))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    // The foreign key was recreated pointing back into `target`, not `source`
    // — inserting a message with a channel_id absent from target.channels
    // must fail.
    let bad_insert = sqlx::query(&format!(
        "INSERT INTO {target}.messages (id, channel_id, message_text) VALUES ($1, $2, 'orphan')"
    ))
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await;
    assert!(bad_insert.is_err());

    handler.drop_namespace(&source).await.unwrap();
    handler.drop_namespace(&target).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn drop_namespace_is_idempotent() {
    let pool = test_pool().await;
    let handler = PgNamespaceHandler::new(pool.clone());
    let missing = unique_schema("never_existed");
    handler.drop_namespace(&missing).await.unwrap();
    handler.drop_namespace(&missing).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn diff_between_identical_snapshots_is_empty_and_fully_skipped() {
    let pool = test_pool().await;
    let schema = unique_schema("state_diff_empty");
    seed_source_schema(&pool, &schema).await;

    let snapshots = PgSnapshotStore::new(pool.clone());
    let env_id = Uuid::new_v4();
    snapshots.capture(env_id, &schema, "before").await.unwrap();
    snapshots.capture(env_id, &schema, "after").await.unwrap();

    let diff = snapshots
        .diff(env_id, &schema, "before", Some("after"))
        .await
        .unwrap();
    assert!(diff.is_empty(), "identical snapshots must diff to nothing (spec.md §8 round-trip law)");

    PgNamespaceHandler::new(pool).drop_namespace(&schema).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn diff_detects_insert_update_delete_across_snapshots() {
    let pool = test_pool().await;
    let schema = unique_schema("state_diff_changes");
    seed_source_schema(&pool, &schema).await;

    let handler = PgNamespaceHandler::new(pool.clone());
    let snapshots = PgSnapshotStore::new(pool.clone());
    let env_id = Uuid::new_v4();
    snapshots.capture(env_id, &schema, "before").await.unwrap();

    let kept_id = Uuid::new_v4();
    sqlx::query(&format!(
        "INSERT INTO {schema}.messages (id, channel, message_text) VALUES ($1, 'C1', 'Hello team!')"
    ))
    .bind(kept_id)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(&format!("UPDATE {schema}.messages SET message_text = 'edited' WHERE message_text = 'seed'"))
        .execute(&pool)
        .await
        .unwrap();

    snapshots.capture(env_id, &schema, "after").await.unwrap();
    let diff = snapshots
        .diff(env_id, &schema, "before", Some("after"))
        .await
        .unwrap();

    assert_eq!(diff.inserts().count(), 1);
    assert_eq!(diff.updates().count(), 1);
    assert_eq!(diff.deletes().count(), 0);
    assert!(diff
        .inserts()
        .any(|c| c.after.as_ref().unwrap()["message_text"].as_str() == Some("Hello team!")));

    handler.drop_namespace(&schema).await.unwrap();
}
