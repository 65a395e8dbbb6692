//! In-memory balances of active accounts.
//!
//! While an account is active its cached balance is the authoritative one;
//! the store only mirrors it. An entry exists from the moment its load
//! completes until its final flush on deactivation. There is no eviction
//! for any other reason, so the cache is bounded by the number of
//! simultaneously active accounts.
//!
//! Public callers can only [`get`](BalanceCache::get) and
//! [`set`](BalanceCache::set); inserting loaded values and removing flushed
//! ones is reserved for the synchronizer.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use coffer_types::{AccountId, Balance, NegativeBalance};

/// Rejected [`BalanceCache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SetError {
    /// The amount was negative.
    #[error(transparent)]
    Negative(#[from] NegativeBalance),
    /// The account has no cached balance: it is inactive or still loading.
    #[error("account {0} is not active")]
    NotActive(AccountId),
}

/// Shared map of active account balances.
#[derive(Debug, Default)]
pub struct BalanceCache {
    entries: RwLock<HashMap<AccountId, Balance>>,
}

impl BalanceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached balance, or `None` if the account is not active or its load
    /// has not completed.
    pub fn get(&self, account: AccountId) -> Option<Balance> {
        self.read().get(&account).copied()
    }

    /// Replace the cached balance of an active account. Does not persist
    /// anything, and never creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`SetError::Negative`] for `amount < 0`, or
    /// [`SetError::NotActive`] if the account has no cached balance. The
    /// cache is left unchanged either way.
    pub fn set(&self, account: AccountId, amount: i64) -> Result<(), SetError> {
        let balance = Balance::new(amount)?;
        let mut entries = self.write();
        let slot = entries
            .get_mut(&account)
            .ok_or(SetError::NotActive(account))?;
        *slot = balance;
        Ok(())
    }

    /// Whether the account has a cached balance.
    pub fn contains(&self, account: AccountId) -> bool {
        self.read().contains_key(&account)
    }

    /// Number of cached accounts.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no account is cached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn insert(&self, account: AccountId, balance: Balance) {
        self.write().insert(account, balance);
    }

    pub(crate) fn remove(&self, account: AccountId) -> Option<Balance> {
        self.write().remove(&account)
    }

    /// Copy of every entry, for the shutdown flush.
    pub(crate) fn snapshot(&self) -> Vec<(AccountId, Balance)> {
        self.read().iter().map(|(id, b)| (*id, *b)).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AccountId, Balance>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AccountId, Balance>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
