//! Load-on-activate and save-on-deactivate against the balance store.
//!
//! Each lifecycle event becomes one task on the shared tokio runtime, so the
//! caller never waits on a store round trip; the returned [`JoinHandle`] is
//! the completion continuation. Tasks for different accounts run in
//! parallel with no ordering between them.
//!
//! Tasks for the *same* account are sequenced: every event joins a
//! per-account lane at submission time and waits for the previous event in
//! that lane to finish before touching the cache or the store. A disconnect
//! fired while the connect's load is still in flight therefore saves the
//! loaded value instead of finding nothing. Administrative
//! [`BalanceCache::set`] calls do not join a lane; the last write to the
//! cache wins.
//!
//! Failed loads and saves are logged and never retried.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use coffer_db::{BalanceStore, DbError};
use coffer_types::{AccountId, Balance};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cache::BalanceCache;

/// Result of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A stored balance was found and cached.
    Loaded(Balance),
    /// No row existed; zero was cached. `persisted` reports whether the
    /// zero row was written to the store.
    Initialized {
        /// Whether the initial zero row reached the store.
        persisted: bool,
    },
    /// The fetch failed; the account has no cached balance.
    Failed,
}

/// Result of a deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The cached balance was written and the entry dropped.
    Saved(Balance),
    /// The write failed; the entry was dropped anyway.
    SaveFailed(Balance),
    /// No cached balance, so nothing was written.
    NothingToSave,
}

/// Result of an administrative write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The account was active; its cached balance was replaced.
    Cached(Balance),
    /// The account was inactive; the balance was written to the store.
    Persisted(Balance),
    /// The account was inactive and the store write failed.
    Failed,
}

/// Tally of a shutdown flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Balances written to the store.
    pub saved: usize,
    /// Balances whose write failed (and were dropped).
    pub failed: usize,
}

/// Pending event in an account's lane.
struct Lane {
    generation: u64,
    done: oneshot::Receiver<()>,
}

type Lanes = Mutex<HashMap<AccountId, Lane>>;

/// Holds an account's lane until the task finishes (or panics).
struct Turn {
    account: AccountId,
    generation: u64,
    lanes: Arc<Lanes>,
    // Dropping the sender wakes the next event in the lane.
    _done: oneshot::Sender<()>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if lanes
            .get(&self.account)
            .is_some_and(|lane| lane.generation == self.generation)
        {
            lanes.remove(&self.account);
        }
    }
}

struct Ticket {
    previous: Option<oneshot::Receiver<()>>,
    turn: Turn,
}

impl Ticket {
    /// Wait for the previous event in the lane, then hold the lane.
    async fn wait_turn(self) -> Turn {
        if let Some(previous) = self.previous {
            // Err only means the sender was dropped, which is the signal.
            let _finished = previous.await;
        }
        self.turn
    }
}

struct Shared<S> {
    store: Arc<S>,
    cache: Arc<BalanceCache>,
    lanes: Arc<Lanes>,
    generation: AtomicU64,
}

/// Mediates between the [`BalanceCache`] and a [`BalanceStore`].
pub struct LifecycleSynchronizer<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for LifecycleSynchronizer<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: BalanceStore> LifecycleSynchronizer<S> {
    /// Create a synchronizer over `store`, populating `cache`.
    pub fn new(store: Arc<S>, cache: Arc<BalanceCache>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                cache,
                lanes: Arc::new(Mutex::new(HashMap::new())),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The cache this synchronizer populates.
    pub fn cache(&self) -> &Arc<BalanceCache> {
        &self.shared.cache
    }

    /// The store this synchronizer reads and writes.
    pub fn store(&self) -> &Arc<S> {
        &self.shared.store
    }

    /// Load the account's balance into the cache, creating a zero row if
    /// the account has never been stored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self, account: AccountId, label: &str) -> JoinHandle<LoadOutcome> {
        let ticket = self.shared.enqueue(account);
        let shared = Arc::clone(&self.shared);
        let label = label.to_owned();
        tracing::info!(account = %account, label = %label, "loading balance");

        tokio::spawn(async move {
            let _turn = ticket.wait_turn().await;
            shared.load(account, &label).await
        })
    }

    /// Flush the account's cached balance to the store and drop it from the
    /// cache. A no-op if nothing is cached.
    ///
    /// Must be called from within a tokio runtime.
    pub fn deactivate(&self, account: AccountId, label: &str) -> JoinHandle<SaveOutcome> {
        let ticket = self.shared.enqueue(account);
        let shared = Arc::clone(&self.shared);
        let label = label.to_owned();
        tracing::info!(account = %account, label = %label, "saving balance");

        tokio::spawn(async move {
            let _turn = ticket.wait_turn().await;
            shared.save(account, &label).await
        })
    }

    /// Administrative set that also covers inactive accounts: an active
    /// account's cached balance is replaced, an inactive account's row is
    /// written straight to the store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn write_through(
        &self,
        account: AccountId,
        label: &str,
        balance: Balance,
    ) -> JoinHandle<WriteOutcome> {
        let ticket = self.shared.enqueue(account);
        let shared = Arc::clone(&self.shared);
        let label = label.to_owned();

        tokio::spawn(async move {
            let _turn = ticket.wait_turn().await;
            shared.write(account, &label, balance).await
        })
    }

    /// Save and drop every cached balance, including those of accounts
    /// whose activation is still in flight. Intended for process shutdown.
    pub async fn flush_all(&self) -> FlushReport {
        let accounts: BTreeSet<AccountId> = {
            let lanes = self
                .shared
                .lanes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared
                .cache
                .snapshot()
                .into_iter()
                .map(|(id, _)| id)
                .chain(lanes.keys().copied())
                .collect()
        };

        tracing::info!(accounts = accounts.len(), "flushing all cached balances");
        let handles = accounts
            .into_iter()
            .map(|account| self.deactivate(account, "shutdown"));
        let results = futures::future::join_all(handles).await;

        let mut report = FlushReport::default();
        for result in results {
            match result {
                Ok(SaveOutcome::Saved(_)) => report.saved = report.saved.saturating_add(1),
                Ok(SaveOutcome::SaveFailed(_)) => {
                    report.failed = report.failed.saturating_add(1);
                }
                Ok(SaveOutcome::NothingToSave) => {}
                Err(e) => {
                    tracing::error!(error = %e, "flush task did not complete");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        tracing::info!(saved = report.saved, failed = report.failed, "flush complete");
        report
    }

    /// Every account with a stored row. Maintenance use only.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store scan fails.
    pub async fn known_accounts(&self) -> Result<BTreeSet<AccountId>, DbError> {
        self.shared.store.list_identities().await
    }
}

impl<S: BalanceStore> Shared<S> {
    fn enqueue(&self, account: AccountId) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account, Lane { generation, done: rx })
            .map(|lane| lane.done);

        Ticket {
            previous,
            turn: Turn {
                account,
                generation,
                lanes: Arc::clone(&self.lanes),
                _done: tx,
            },
        }
    }

    async fn load(&self, account: AccountId, label: &str) -> LoadOutcome {
        match self.store.fetch(account).await {
            Ok(Some(balance)) => {
                self.cache.insert(account, balance);
                tracing::info!(
                    account = %account,
                    label = %label,
                    balance = balance.get(),
                    "balance loaded"
                );
                LoadOutcome::Loaded(balance)
            }
            Ok(None) => {
                self.cache.insert(account, Balance::ZERO);
                let persisted = match self.store.upsert(account, Balance::ZERO).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            account = %account,
                            label = %label,
                            error = %e,
                            "initial zero balance not persisted"
                        );
                        false
                    }
                };
                tracing::info!(
                    account = %account,
                    label = %label,
                    persisted,
                    "new account initialized with zero balance"
                );
                LoadOutcome::Initialized { persisted }
            }
            Err(e) => {
                tracing::warn!(
                    account = %account,
                    label = %label,
                    operation = "load",
                    error = %e,
                    "balance load failed, balance unavailable"
                );
                LoadOutcome::Failed
            }
        }
    }

    async fn save(&self, account: AccountId, label: &str) -> SaveOutcome {
        let Some(balance) = self.cache.get(account) else {
            tracing::debug!(account = %account, label = %label, "no cached balance to save");
            return SaveOutcome::NothingToSave;
        };

        let result = self.store.upsert(account, balance).await;
        // Dropped whether or not the write landed.
        self.cache.remove(account);

        match result {
            Ok(()) => {
                tracing::info!(
                    account = %account,
                    label = %label,
                    balance = balance.get(),
                    "balance saved"
                );
                SaveOutcome::Saved(balance)
            }
            Err(e) => {
                tracing::error!(
                    account = %account,
                    label = %label,
                    operation = "save",
                    balance = balance.get(),
                    error = %e,
                    "balance save failed, cached value dropped"
                );
                SaveOutcome::SaveFailed(balance)
            }
        }
    }

    async fn write(&self, account: AccountId, label: &str, balance: Balance) -> WriteOutcome {
        if self.cache.contains(account) {
            self.cache.insert(account, balance);
            tracing::info!(
                account = %account,
                label = %label,
                balance = balance.get(),
                "active balance replaced"
            );
            return WriteOutcome::Cached(balance);
        }

        match self.store.upsert(account, balance).await {
            Ok(()) => {
                tracing::info!(
                    account = %account,
                    label = %label,
                    balance = balance.get(),
                    "inactive balance written to store"
                );
                WriteOutcome::Persisted(balance)
            }
            Err(e) => {
                tracing::warn!(
                    account = %account,
                    label = %label,
                    operation = "write",
                    error = %e,
                    "inactive balance write failed"
                );
                WriteOutcome::Failed
            }
        }
    }
}
