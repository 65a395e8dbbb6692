//! Persistence layer for the Coffer economy.
//!
//! Balances live durably in a single MySQL table and are only touched at
//! account activation and deactivation boundaries (plus explicit admin
//! writes). This crate owns the connection to that table, the statements
//! run against it, and the background probe that keeps the connection
//! alive.
//!
//! # Architecture
//!
//! ```text
//! LifecycleSynchronizer (coffer-core)
//!     |
//!     +-- fetch / upsert --> BalanceStore
//!                               |-- MySqlBalanceStore  (SqlConnection -> MySQL)
//!                               +-- MemoryBalanceStore (tests, tooling)
//!
//! HealthMonitor --- probe every 10s, reconnect on failure ---^
//! ```
//!
//! # Modules
//!
//! - [`balance_store`] -- [`BalanceStore`] trait and the MySQL implementation
//! - [`mysql`] -- Connection configuration and the shared connection handle
//! - [`memory`] -- In-process store with scriptable connection faults
//! - [`health`] -- Fixed-cadence connection prober
//! - [`error`] -- Shared error types

pub mod balance_store;
pub mod error;
pub mod health;
pub mod memory;
pub mod mysql;

// Re-export primary types for convenience.
pub use balance_store::{BalanceStore, MySqlBalanceStore, TABLE_NAME};
pub use error::{DbError, InitStage};
pub use health::{DEFAULT_PROBE_INTERVAL, HealthMonitor, HealthReport};
pub use memory::{CallCounts, MemoryBalanceStore};
pub use mysql::{ConnectionScope, MySqlConfig, SqlConnection};
