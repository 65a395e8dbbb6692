//! Balance cache and persistence synchronization for the Coffer economy.
//!
//! Active accounts keep their balance in memory; the store is read when an
//! account connects and written when it disconnects. Events for the same
//! account are applied in the order they were raised.
//!
//! # Modules
//!
//! - [`cache`] -- [`BalanceCache`], the in-memory balances of active accounts.
//! - [`sync`] -- [`LifecycleSynchronizer`], load-on-join and save-on-quit.
//! - [`economy`] -- [`Economy`], the facade hosts wire into.
//! - [`command`] -- Balance view and admin set commands.
//! - [`config`] -- Configuration loading from `economy-config.yaml`.

pub mod cache;
pub mod command;
pub mod config;
pub mod economy;
pub mod sync;

pub use cache::{BalanceCache, SetError};
pub use command::{
    AmountError, CommandError, Directory, EconomyCommands, Profile, Reply, ReplyKind, Sender,
    parse_amount,
};
pub use config::{ConfigError, EconomyConfig};
pub use economy::Economy;
pub use sync::{FlushReport, LifecycleSynchronizer, LoadOutcome, SaveOutcome, WriteOutcome};
