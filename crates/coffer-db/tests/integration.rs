//! Integration tests for the `coffer-db` persistence layer.
//!
//! These tests require a live MySQL server. Run with:
//!
//! ```bash
//! docker run -d --name coffer-mysql -p 3306:3306 \
//!     -e MYSQL_ROOT_PASSWORD=coffer_dev mysql:8
//! cargo test -p coffer-db -- --ignored
//! docker rm -f coffer-mysql
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use coffer_db::{
    BalanceStore, DbError, HealthMonitor, InitStage, MySqlBalanceStore, MySqlConfig,
};
use coffer_types::{AccountId, Balance};
use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};

/// Database used by the tests; created on first run.
const TEST_DATABASE: &str = "coffer_test";

fn config() -> MySqlConfig {
    MySqlConfig::new("127.0.0.1", TEST_DATABASE).with_credentials("root", "coffer_dev")
}

/// Direct connection for writing rows the store itself would never write.
async fn raw_connection() -> MySqlConnection {
    let options = MySqlConnectOptions::new()
        .host("127.0.0.1")
        .username("root")
        .password("coffer_dev")
        .database(TEST_DATABASE);
    MySqlConnection::connect_with(&options)
        .await
        .expect("Failed to connect to MySQL")
}

async fn insert_raw(key: &str, balance: Option<i64>) {
    let mut conn = raw_connection().await;
    sqlx::query("INSERT INTO economy (uuid, balance) VALUES (?, ?)")
        .bind(key)
        .bind(balance)
        .execute(&mut conn)
        .await
        .expect("raw insert failed");
    conn.close().await.expect("close failed");
}

async fn delete_raw(key: &str) {
    let mut conn = raw_connection().await;
    sqlx::query("DELETE FROM economy WHERE uuid = ?")
        .bind(key)
        .execute(&mut conn)
        .await
        .expect("raw delete failed");
    conn.close().await.expect("close failed");
}

async fn open_store() -> MySqlBalanceStore {
    MySqlBalanceStore::open(config())
        .await
        .expect("Failed to open store -- is MySQL running?")
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn open_creates_database_and_table() {
    let store = open_store().await;
    assert!(store.is_live());

    // Opening a second time is a no-op on the schema.
    let again = open_store().await;
    assert!(again.is_live());

    store.close().await;
    again.close().await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn fetch_missing_row_is_none() {
    let store = open_store().await;
    let fetched = store.fetch(AccountId::new()).await.expect("fetch failed");
    assert_eq!(fetched, None);
    store.close().await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn upsert_inserts_then_overwrites() {
    let store = open_store().await;
    let id = AccountId::new();

    store.upsert(id, Balance::ZERO).await.expect("insert failed");
    assert_eq!(store.fetch(id).await.unwrap(), Some(Balance::ZERO));

    let five_hundred = Balance::new(500).unwrap();
    store.upsert(id, five_hundred).await.expect("update failed");
    store.upsert(id, five_hundred).await.expect("idempotent update failed");
    assert_eq!(store.fetch(id).await.unwrap(), Some(five_hundred));

    let ids = store.list_identities().await.expect("list failed");
    assert!(ids.contains(&id));

    store.close().await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn concurrent_upserts_for_different_accounts() {
    let store = Arc::new(open_store().await);
    let ids: Vec<AccountId> = (0..16).map(|_| AccountId::new()).collect();

    let mut tasks = Vec::new();
    for (n, id) in ids.iter().copied().enumerate() {
        let store = Arc::clone(&store);
        let amount = Balance::new(i64::try_from(n).unwrap()).unwrap();
        tasks.push(tokio::spawn(async move { store.upsert(id, amount).await }));
    }
    for task in tasks {
        task.await.unwrap().expect("upsert failed");
    }

    for (n, id) in ids.iter().copied().enumerate() {
        let expected = Balance::new(i64::try_from(n).unwrap()).unwrap();
        assert_eq!(store.fetch(id).await.unwrap(), Some(expected));
    }
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn probe_and_reconnect() {
    let store = Arc::new(open_store().await);
    store.probe().await.expect("probe on fresh connection failed");

    store.reconnect().await.expect("reconnect failed");
    let report = HealthMonitor::new(Arc::clone(&store), Duration::from_millis(50))
        .run_for(2)
        .await;
    assert_eq!(report.failures, 0);

    // Closing kills the connection; the next probe fails and the monitor
    // restores it.
    store.close().await;
    assert!(!store.is_live());
    let report = HealthMonitor::new(Arc::clone(&store), Duration::from_millis(50))
        .run_for(1)
        .await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.reconnects, 1);
    assert!(store.is_live());
    assert!(store.fetch(AccountId::new()).await.is_ok());
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn unreachable_server_fails_at_create_database() {
    let config = MySqlConfig::new("127.0.0.1", TEST_DATABASE)
        .with_port(9)
        .with_connect_timeout(Duration::from_millis(500));
    let result = MySqlBalanceStore::open(config).await;
    assert!(matches!(
        result,
        Err(DbError::Init {
            stage: InitStage::CreateDatabase,
            ..
        })
    ));
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn null_balance_reads_as_zero() {
    let store = open_store().await;
    let id = AccountId::new();
    insert_raw(&id.to_string(), None).await;

    assert_eq!(store.fetch(id).await.unwrap(), Some(Balance::ZERO));

    delete_raw(&id.to_string()).await;
    store.close().await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn negative_balance_is_corrupt_row() {
    let store = open_store().await;
    let id = AccountId::new();
    let key = id.to_string();
    insert_raw(&key, Some(-5)).await;

    let result = store.fetch(id).await;
    assert!(
        matches!(&result, Err(DbError::CorruptRow { key: k, .. }) if *k == key),
        "unexpected fetch result: {result:?}"
    );
    // A bad row is not a connection failure.
    assert!(store.is_live());

    delete_raw(&key).await;
    store.close().await;
}

#[tokio::test]
#[ignore = "requires live MySQL instance"]
async fn list_identities_skips_non_uuid_keys() {
    let store = open_store().await;
    let id = AccountId::new();
    store.upsert(id, Balance::new(3).unwrap()).await.unwrap();
    let bad_key = format!("not-a-uuid-{}", uuid::Uuid::new_v4().simple());
    insert_raw(&bad_key, Some(1)).await;

    let ids = store.list_identities().await.expect("list failed");
    assert!(ids.contains(&id));
    assert!(ids.iter().all(|listed| listed.to_string() != bad_key));

    delete_raw(&bad_key).await;
    store.close().await;
}
