//! In-process [`BalanceStore`] with scriptable connection faults.
//!
//! Behaves like the MySQL store from the caller's point of view, including
//! the connection lifecycle: a severed link still looks live until it is
//! used, a known-dead link is re-established inline if the server is
//! reachable, and an offline server fails every call with
//! [`DbError::ConnectionUnavailable`]. Used by tests and local tooling that
//! must run without a database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use coffer_types::{AccountId, Balance};

use crate::balance_store::BalanceStore;
use crate::error::DbError;

/// State of the simulated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Connected and working.
    Healthy,
    /// Broken, but nobody has noticed yet.
    Severed,
    /// Known dead.
    Closed,
}

/// Call counts, for asserting which store operations actually ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Calls to `fetch`.
    pub fetches: u64,
    /// Calls to `upsert`.
    pub upserts: u64,
    /// Calls to `probe`.
    pub probes: u64,
    /// Calls to `reconnect`.
    pub reconnects: u64,
}

/// Memory-backed [`BalanceStore`].
#[derive(Debug)]
pub struct MemoryBalanceStore {
    rows: Mutex<BTreeMap<AccountId, Balance>>,
    link: Mutex<Link>,
    online: AtomicBool,
    failing_upserts: AtomicU64,
    fetches: AtomicU64,
    upserts: AtomicU64,
    probes: AtomicU64,
    reconnects: AtomicU64,
}

impl MemoryBalanceStore {
    /// Create an empty, connected store.
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            link: Mutex::new(Link::Healthy),
            online: AtomicBool::new(true),
            failing_upserts: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Write a row directly, bypassing the call counters and link state.
    pub fn seed(&self, account: AccountId, balance: Balance) {
        self.rows().insert(account, balance);
    }

    /// Read a row directly, bypassing the call counters and link state.
    pub fn row(&self, account: AccountId) -> Option<Balance> {
        self.rows().get(&account).copied()
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> usize {
        self.rows().len()
    }

    /// Make the server reachable or unreachable. Going offline also kills
    /// the current connection.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
        if !online {
            *self.link() = Link::Closed;
        }
    }

    /// Break the connection silently: it still reports live until the next
    /// call touches it.
    pub fn sever_connection(&self) {
        *self.link() = Link::Severed;
    }

    /// Make the next `count` upserts fail with a statement error while the
    /// connection stays healthy.
    pub fn fail_upserts(&self, count: u64) {
        self.failing_upserts.store(count, Ordering::Release);
    }

    /// Snapshot of how many times each operation was called.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            fetches: self.fetches.load(Ordering::Acquire),
            upserts: self.upserts.load(Ordering::Acquire),
            probes: self.probes.load(Ordering::Acquire),
            reconnects: self.reconnects.load(Ordering::Acquire),
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, BTreeMap<AccountId, Balance>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror of `SqlConnection::acquire` followed by use of the connection.
    fn use_connection(&self) -> Result<(), DbError> {
        let mut link = self.link();
        match *link {
            Link::Healthy => Ok(()),
            Link::Severed => {
                *link = Link::Closed;
                Err(DbError::MySql(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))))
            }
            Link::Closed => {
                if self.online.load(Ordering::Acquire) {
                    *link = Link::Healthy;
                    Ok(())
                } else {
                    Err(DbError::ConnectionUnavailable(
                        "memory store is offline".to_owned(),
                    ))
                }
            }
        }
    }
}

impl Default for MemoryBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceStore for MemoryBalanceStore {
    async fn fetch(&self, account: AccountId) -> Result<Option<Balance>, DbError> {
        self.fetches.fetch_add(1, Ordering::AcqRel);
        self.use_connection()?;
        Ok(self.row(account))
    }

    async fn upsert(&self, account: AccountId, balance: Balance) -> Result<(), DbError> {
        self.upserts.fetch_add(1, Ordering::AcqRel);
        self.use_connection()?;
        if self
            .failing_upserts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DbError::MySql(sqlx::Error::Protocol(
                "injected upsert failure".to_owned(),
            )));
        }
        self.seed(account, balance);
        Ok(())
    }

    async fn list_identities(&self) -> Result<BTreeSet<AccountId>, DbError> {
        self.use_connection()?;
        Ok(self.rows().keys().copied().collect())
    }

    fn is_live(&self) -> bool {
        *self.link() != Link::Closed
    }

    async fn probe(&self) -> Result<(), DbError> {
        self.probes.fetch_add(1, Ordering::AcqRel);
        let mut link = self.link();
        match *link {
            Link::Healthy => Ok(()),
            Link::Severed => {
                *link = Link::Closed;
                Err(DbError::ConnectionUnavailable(
                    "probe failed: connection reset".to_owned(),
                ))
            }
            Link::Closed => Err(DbError::ConnectionUnavailable(
                "no live connection held".to_owned(),
            )),
        }
    }

    async fn reconnect(&self) -> Result<(), DbError> {
        self.reconnects.fetch_add(1, Ordering::AcqRel);
        let mut link = self.link();
        if self.online.load(Ordering::Acquire) {
            *link = Link::Healthy;
            Ok(())
        } else {
            *link = Link::Closed;
            Err(DbError::ConnectionUnavailable(
                "memory store is offline".to_owned(),
            ))
        }
    }
}
