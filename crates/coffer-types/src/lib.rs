//! Shared types for the Coffer economy.
//!
//! Every crate in the workspace speaks in terms of an [`AccountId`] (who
//! owns the money) and a [`Balance`] (how much they own). Both are small
//! `Copy` newtypes so they can move freely between the cache, the store,
//! and spawned tasks.

pub mod balance;
pub mod ids;

pub use balance::{Balance, NegativeBalance};
pub use ids::AccountId;
