//! The host-facing economy service.
//!
//! [`Economy`] is what the host wires its connect/disconnect events and its
//! admin tooling into. It owns the [`BalanceCache`] and the
//! [`LifecycleSynchronizer`] for one store, and is built once, after the
//! store has signalled readiness by finishing
//! [`MySqlBalanceStore::open`](coffer_db::MySqlBalanceStore::open). Calling
//! [`Economy::shutdown`] before the process exits flushes every balance that
//! is still cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use coffer_db::{BalanceStore, DbError};
use coffer_types::{AccountId, Balance};
use tokio::task::JoinHandle;

use crate::cache::{BalanceCache, SetError};
use crate::sync::{FlushReport, LifecycleSynchronizer, LoadOutcome, SaveOutcome, WriteOutcome};

/// Balance cache plus persistence synchronization for one store.
pub struct Economy<S> {
    sync: LifecycleSynchronizer<S>,
}

impl<S: BalanceStore> Economy<S> {
    /// Build the service over a ready store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            sync: LifecycleSynchronizer::new(store, Arc::new(BalanceCache::new())),
        }
    }

    /// Current balance of an active account. `None` means the account is
    /// not active or its balance has not finished loading.
    pub fn balance(&self, account: AccountId) -> Option<Balance> {
        self.sync.cache().get(account)
    }

    /// Replace the cached balance of an active account. Nothing is
    /// persisted until the account deactivates; use
    /// [`set_balance_durable`](Self::set_balance_durable) for accounts that
    /// may be inactive.
    ///
    /// # Errors
    ///
    /// Returns [`SetError::Negative`] for `amount < 0` and
    /// [`SetError::NotActive`] if the account has no cached balance. The
    /// cache is left unchanged.
    pub fn set_balance(&self, account: AccountId, amount: i64) -> Result<(), SetError> {
        self.sync.cache().set(account, amount).inspect_err(|e| {
            tracing::debug!(account = %account, amount, error = %e, "balance set rejected");
        })
    }

    /// Administrative set for an account that may be inactive. See
    /// [`LifecycleSynchronizer::write_through`].
    pub fn set_balance_durable(
        &self,
        account: AccountId,
        label: &str,
        balance: Balance,
    ) -> JoinHandle<WriteOutcome> {
        self.sync.write_through(account, label, balance)
    }

    /// The account connected: start loading its balance.
    pub fn on_join(&self, account: AccountId, label: &str) -> JoinHandle<LoadOutcome> {
        self.sync.activate(account, label)
    }

    /// The account disconnected: start saving its balance.
    pub fn on_quit(&self, account: AccountId, label: &str) -> JoinHandle<SaveOutcome> {
        self.sync.deactivate(account, label)
    }

    /// Every account with a stored row. Maintenance use only.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store scan fails.
    pub async fn known_identities(&self) -> Result<BTreeSet<AccountId>, DbError> {
        self.sync.known_accounts().await
    }

    /// Number of accounts with a cached balance.
    pub fn active_accounts(&self) -> usize {
        self.sync.cache().len()
    }

    /// Whether the store connection is believed healthy.
    pub fn store_live(&self) -> bool {
        self.sync.store().is_live()
    }

    /// The store backing this service.
    pub fn store(&self) -> &Arc<S> {
        self.sync.store()
    }

    /// Flush every cached balance to the store.
    pub async fn shutdown(&self) -> FlushReport {
        self.sync.flush_all().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coffer_db::MemoryBalanceStore;

    use super::*;

    fn economy() -> (Arc<MemoryBalanceStore>, Economy<MemoryBalanceStore>) {
        let store = Arc::new(MemoryBalanceStore::new());
        (Arc::clone(&store), Economy::new(store))
    }

    #[tokio::test]
    async fn join_set_quit_scenario() {
        let (store, economy) = economy();
        let a = AccountId::new();

        economy.on_join(a, "alice").await.unwrap();
        assert_eq!(store.row(a), Some(Balance::ZERO));
        assert_eq!(economy.balance(a), Some(Balance::ZERO));

        economy.set_balance(a, 500).unwrap();
        assert_eq!(economy.balance(a).map(Balance::get), Some(500));

        economy.on_quit(a, "alice").await.unwrap();
        assert_eq!(store.row(a).map(Balance::get), Some(500));
        assert_eq!(economy.balance(a), None);
        assert_eq!(economy.active_accounts(), 0);
    }

    #[tokio::test]
    async fn rejoin_loads_saved_value() {
        let (_store, economy) = economy();
        let a = AccountId::new();

        economy.on_join(a, "alice").await.unwrap();
        economy.set_balance(a, 42).unwrap();
        economy.on_quit(a, "alice").await.unwrap();

        let outcome = economy.on_join(a, "alice").await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded(Balance::new(42).unwrap()));
        assert_eq!(economy.balance(a).map(Balance::get), Some(42));
    }

    #[tokio::test]
    async fn negative_set_is_rejected() {
        let (_store, economy) = economy();
        let a = AccountId::new();
        economy.on_join(a, "alice").await.unwrap();
        economy.set_balance(a, 10).unwrap();

        assert!(economy.set_balance(a, -10).is_err());
        assert_eq!(economy.balance(a).map(Balance::get), Some(10));
    }

    #[tokio::test]
    async fn set_on_inactive_account_is_rejected() {
        let (store, economy) = economy();
        let a = AccountId::new();
        store.seed(a, Balance::new(70).unwrap());

        assert_eq!(economy.set_balance(a, 500), Err(SetError::NotActive(a)));
        assert_eq!(economy.balance(a), None);
        assert_eq!(economy.active_accounts(), 0);

        let outcome = economy.on_join(a, "alice").await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded(Balance::new(70).unwrap()));
        economy.set_balance(a, 500).unwrap();
        assert_eq!(economy.balance(a).map(Balance::get), Some(500));
    }

    #[tokio::test]
    async fn durable_set_on_inactive_account_survives_join() {
        let (store, economy) = economy();
        let a = AccountId::new();
        store.seed(a, Balance::new(70).unwrap());

        let written = economy
            .set_balance_durable(a, "alice", Balance::new(500).unwrap())
            .await
            .unwrap();
        assert_eq!(written, WriteOutcome::Persisted(Balance::new(500).unwrap()));
        assert_eq!(economy.active_accounts(), 0);

        economy.on_join(a, "alice").await.unwrap();
        assert_eq!(economy.balance(a).map(Balance::get), Some(500));
    }

    #[tokio::test]
    async fn balance_unavailable_while_store_down() {
        let (store, economy) = economy();
        let a = AccountId::new();
        store.set_online(false);

        assert_eq!(economy.on_join(a, "alice").await.unwrap(), LoadOutcome::Failed);
        assert_eq!(economy.balance(a), None);
        assert!(!economy.store_live());
    }

    #[tokio::test]
    async fn shutdown_flushes_active_accounts() {
        let (store, economy) = economy();
        let a = AccountId::new();
        let b = AccountId::new();
        economy.on_join(a, "a").await.unwrap();
        economy.on_join(b, "b").await.unwrap();
        economy.set_balance(a, 1).unwrap();
        economy.set_balance(b, 2).unwrap();

        let report = economy.shutdown().await;
        assert_eq!(report.saved, 2);
        assert_eq!(store.row(a).map(Balance::get), Some(1));
        assert_eq!(store.row(b).map(Balance::get), Some(2));
        assert_eq!(economy.known_identities().await.unwrap().len(), 2);
    }
}
