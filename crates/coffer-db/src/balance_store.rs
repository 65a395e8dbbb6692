//! Durable balance storage.
//!
//! [`BalanceStore`] is the seam between the in-memory cache and whatever
//! holds balances durably. [`MySqlBalanceStore`] is the production
//! implementation: one `economy` table keyed by the account's UUID text.
//!
//! # Schema
//!
//! ```text
//! economy
//!   uuid     VARCHAR(255) NOT NULL  PRIMARY KEY
//!   balance  BIGINT
//! ```
//!
//! Writes are upserts, so flushing the same account twice is harmless and
//! concurrent flushes of one account resolve last-write-wins.

use std::collections::BTreeSet;
use std::future::Future;

use coffer_types::{AccountId, Balance};

use crate::error::{DbError, InitStage};
use crate::mysql::{ConnectionScope, MySqlConfig, SqlConnection};

/// Name of the balance table.
pub const TABLE_NAME: &str = "economy";

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS economy \
     (uuid VARCHAR(255) NOT NULL, balance BIGINT, PRIMARY KEY (uuid))";

const SELECT_BALANCE_SQL: &str = "SELECT balance FROM economy WHERE uuid = ?";

const UPSERT_BALANCE_SQL: &str = "INSERT INTO economy (uuid, balance) VALUES (?, ?) \
     ON DUPLICATE KEY UPDATE balance = VALUES(balance)";

const SELECT_UUIDS_SQL: &str = "SELECT uuid FROM economy";

/// Durable key-to-balance storage.
///
/// Every call runs to completion or failure; there is no retry inside a
/// single call. Implementations must be safe to call concurrently for
/// different accounts.
pub trait BalanceStore: Send + Sync + 'static {
    /// Point lookup. `Ok(None)` means the account has never been stored.
    fn fetch(
        &self,
        account: AccountId,
    ) -> impl Future<Output = Result<Option<Balance>, DbError>> + Send;

    /// Insert the row, or overwrite it if present.
    fn upsert(
        &self,
        account: AccountId,
        balance: Balance,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Every account that has a row. Maintenance use only.
    fn list_identities(&self) -> impl Future<Output = Result<BTreeSet<AccountId>, DbError>> + Send;

    /// Last known connection health. Never blocks.
    fn is_live(&self) -> bool;

    /// Issue a trivial query on the current connection without reconnecting.
    fn probe(&self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Drop the current connection and establish a new one.
    fn reconnect(&self) -> impl Future<Output = Result<(), DbError>> + Send;
}

/// MySQL-backed [`BalanceStore`].
pub struct MySqlBalanceStore {
    connection: SqlConnection,
}

impl MySqlBalanceStore {
    /// Bring the store up: ensure the database exists, then ensure the
    /// balance table exists. Returns only once both stages succeed, which
    /// is the store's readiness signal.
    ///
    /// The first stage runs on a server-scoped connection (no database
    /// selected); the working connection is then re-acquired with the
    /// database selected for the second stage.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the configuration is unusable, or
    /// [`DbError::Init`] naming the stage that failed.
    pub async fn open(config: MySqlConfig) -> Result<Self, DbError> {
        config.validate()?;
        let connection = SqlConnection::new(config, ConnectionScope::Server);

        tracing::info!("Initializing economy database...");
        create_database(&connection)
            .await
            .map_err(|e| e.at_stage(InitStage::CreateDatabase))?;
        tracing::info!(
            database = %connection.config().database,
            "Economy database initialized"
        );

        connection
            .rescope(ConnectionScope::Database)
            .await
            .map_err(|e| e.at_stage(InitStage::CreateTable))?;

        tracing::info!(table = TABLE_NAME, "Setting up economy table...");
        create_table(&connection)
            .await
            .map_err(|e| e.at_stage(InitStage::CreateTable))?;
        tracing::info!(table = TABLE_NAME, "Economy table ready");

        Ok(Self { connection })
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

async fn create_database(connection: &SqlConnection) -> Result<(), DbError> {
    // Name was checked by `MySqlConfig::validate`; DDL cannot bind it.
    let sql = format!(
        "CREATE DATABASE IF NOT EXISTS `{}`",
        connection.config().database
    );
    let mut conn = connection.acquire().await?;
    let result = sqlx::query(&sql)
        .execute(&mut *conn)
        .await
        .map(drop)
        .map_err(DbError::from);
    drop(conn);
    connection.observe(&result);
    result
}

async fn create_table(connection: &SqlConnection) -> Result<(), DbError> {
    let mut conn = connection.acquire().await?;
    let result = sqlx::query(CREATE_TABLE_SQL)
        .execute(&mut *conn)
        .await
        .map(drop)
        .map_err(DbError::from);
    drop(conn);
    connection.observe(&result);
    result
}

impl BalanceStore for MySqlBalanceStore {
    async fn fetch(&self, account: AccountId) -> Result<Option<Balance>, DbError> {
        let key = account.to_string();
        let mut conn = self.connection.acquire().await?;
        let result = sqlx::query_scalar::<_, Option<i64>>(SELECT_BALANCE_SQL)
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::from);
        drop(conn);
        self.connection.observe(&result);

        match result {
            // A NULL balance column reads as zero.
            Ok(Some(stored)) => Balance::new(stored.unwrap_or(0))
                .map(Some)
                .map_err(|e| {
                    tracing::warn!(
                        account = %account,
                        stored = e.attempted,
                        "stored balance is negative"
                    );
                    DbError::CorruptRow {
                        key,
                        reason: e.to_string(),
                    }
                }),
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "balance fetch failed");
                Err(e)
            }
        }
    }

    async fn upsert(&self, account: AccountId, balance: Balance) -> Result<(), DbError> {
        let mut conn = self.connection.acquire().await?;
        let result = sqlx::query(UPSERT_BALANCE_SQL)
            .bind(account.to_string())
            .bind(balance.get())
            .execute(&mut *conn)
            .await
            .map(drop)
            .map_err(DbError::from);
        drop(conn);
        self.connection.observe(&result);

        if let Err(e) = &result {
            tracing::warn!(
                account = %account,
                balance = balance.get(),
                error = %e,
                "balance upsert failed"
            );
        }
        result
    }

    async fn list_identities(&self) -> Result<BTreeSet<AccountId>, DbError> {
        let mut conn = self.connection.acquire().await?;
        let result = sqlx::query_scalar::<_, String>(SELECT_UUIDS_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::from);
        drop(conn);
        self.connection.observe(&result);

        let keys = result?;
        let mut accounts = BTreeSet::new();
        for key in keys {
            match key.parse::<AccountId>() {
                Ok(id) => {
                    accounts.insert(id);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping non-UUID key in economy table");
                }
            }
        }
        Ok(accounts)
    }

    fn is_live(&self) -> bool {
        self.connection.is_live()
    }

    async fn probe(&self) -> Result<(), DbError> {
        let mut conn = self.connection.current().await?;
        let result = sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map(drop)
            .map_err(DbError::from);
        drop(conn);
        if result.is_err() {
            self.connection.mark_dead();
        }
        result
    }

    async fn reconnect(&self) -> Result<(), DbError> {
        self.connection.reconnect().await
    }
}
