//! Admin and player commands over the economy.
//!
//! This is the thin presentation layer: it resolves names through a
//! host-provided [`Directory`], validates amounts, calls into [`Economy`],
//! and renders a [`Reply`] for whoever issued the command. All reply texts
//! are fixed strings so hosts can match on them.

use std::sync::Arc;

use coffer_db::BalanceStore;
use coffer_types::{AccountId, Balance};

use crate::economy::Economy;
use crate::sync::WriteOutcome;

/// What the host knows about a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Stable identity.
    pub id: AccountId,
    /// Canonical display name.
    pub name: String,
    /// Whether the identity has ever connected.
    pub has_played_before: bool,
    /// Whether the identity is connected right now.
    pub online: bool,
}

impl Profile {
    /// A profile the economy may act on: seen before, or present now.
    pub const fn is_known(&self) -> bool {
        self.has_played_before || self.online
    }
}

/// Name resolution supplied by the host.
pub trait Directory: Send + Sync {
    /// Resolve a display name. `None` if the host has never heard of it.
    fn lookup(&self, name: &str) -> Option<Profile>;
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// A connected account.
    Player {
        /// The issuing account.
        profile: Profile,
        /// Whether it holds the economy admin permission.
        admin: bool,
    },
    /// The operator console. Always an admin, never has a balance.
    Console,
}

impl Sender {
    const fn is_admin(&self) -> bool {
        match self {
            Self::Player { admin, .. } => *admin,
            Self::Console => true,
        }
    }
}

/// Tone of a reply, for hosts that colour output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// A balance readout.
    Info,
    /// A change was applied.
    Success,
    /// Nothing was changed.
    Error,
}

/// Message to send back to the command's issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Tone of the message.
    pub kind: ReplyKind,
    /// Message text.
    pub text: String,
}

impl Reply {
    fn info(text: String) -> Self {
        Self {
            kind: ReplyKind::Info,
            text,
        }
    }

    fn success(text: String) -> Self {
        Self {
            kind: ReplyKind::Success,
            text,
        }
    }

    fn error(text: String) -> Self {
        Self {
            kind: ReplyKind::Error,
            text,
        }
    }
}

/// Rejected amount argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// Not numeric at all.
    #[error("Unable to set balance to a non-number, tried '{0}'")]
    NotANumber(String),
    /// Numeric, but fractional or negative.
    #[error("Only able to set whole, positive numbers, tried '{0}'")]
    NotWhole(String),
}

/// Parse a balance argument.
///
/// # Errors
///
/// [`AmountError::NotWhole`] for fractional, negative or out-of-range
/// numbers, [`AmountError::NotANumber`] for anything else.
pub fn parse_amount(raw: &str) -> Result<Balance, AmountError> {
    match raw.parse::<i64>() {
        Ok(amount) => Balance::new(amount).map_err(|_| AmountError::NotWhole(raw.to_owned())),
        Err(_) if raw.parse::<f64>().is_ok() => Err(AmountError::NotWhole(raw.to_owned())),
        Err(_) => Err(AmountError::NotANumber(raw.to_owned())),
    }
}

/// Why a command did nothing.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The name resolves to nobody the economy knows.
    #[error("Unable to find player {0}")]
    UnknownPlayer(String),
    /// The amount argument was rejected.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// The console asked for its own balance.
    #[error("Console unable to view balance of self")]
    ConsoleHasNoBalance,
    /// The sender lacks the admin permission.
    #[error("I'm sorry, but you do not have permission to perform this command.")]
    PermissionDenied,
    /// The store rejected the write for an inactive account.
    #[error("Failed to save {0}'s balance")]
    StoreFailed(String),
}

/// Command handlers bound to one economy and one directory.
pub struct EconomyCommands<S, D> {
    economy: Arc<Economy<S>>,
    directory: D,
}

impl<S: BalanceStore, D: Directory> EconomyCommands<S, D> {
    /// Bind handlers to an economy and a name directory.
    pub const fn new(economy: Arc<Economy<S>>, directory: D) -> Self {
        Self { economy, directory }
    }

    /// The name directory.
    pub const fn directory(&self) -> &D {
        &self.directory
    }

    /// A player viewing their own balance.
    pub fn view_own(&self, profile: &Profile) -> Reply {
        match self.economy.balance(profile.id) {
            Some(balance) => Reply::info(format!("Balance: {balance}")),
            None => Reply::error("Balance loading...".to_owned()),
        }
    }

    /// `bal [name]`.
    pub fn view(&self, sender: &Sender, name: Option<&str>) -> Reply {
        let Some(name) = name else {
            return match sender {
                Sender::Player { profile, .. } => self.view_own(profile),
                Sender::Console => Reply::error(CommandError::ConsoleHasNoBalance.to_string()),
            };
        };

        let target = match self.resolve(name) {
            Ok(target) => target,
            Err(e) => return Reply::error(e.to_string()),
        };
        match self.economy.balance(target.id) {
            Some(balance) => Reply::info(format!("{}'s Balance: {balance}", target.name)),
            None => Reply::error(format!("{}'s balance is loading...", target.name)),
        }
    }

    /// `setbal <name> <amount>`. Admin only.
    ///
    /// The write is queued behind any pending join or quit of the target,
    /// so it lands in the cache if the target is active by then and in the
    /// store otherwise.
    pub async fn set(&self, sender: &Sender, name: &str, value: &str) -> Reply {
        match self.try_set(sender, name, value).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(target_name = name, error = %e, "setbal rejected");
                Reply::error(e.to_string())
            }
        }
    }

    async fn try_set(&self, sender: &Sender, name: &str, value: &str) -> Result<Reply, CommandError> {
        if !sender.is_admin() {
            return Err(CommandError::PermissionDenied);
        }
        let target = self.resolve(name)?;
        let balance = parse_amount(value)?;

        let outcome = self
            .economy
            .set_balance_durable(target.id, &target.name, balance)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(account = %target.id, error = %e, "balance write task did not complete");
                WriteOutcome::Failed
            });

        match outcome {
            WriteOutcome::Cached(_) | WriteOutcome::Persisted(_) => {
                tracing::info!(account = %target.id, label = %target.name, balance = %balance, "balance set by admin");
                Ok(Reply::success(format!(
                    "{}'s balance has been set to {balance}",
                    target.name
                )))
            }
            WriteOutcome::Failed => Err(CommandError::StoreFailed(target.name)),
        }
    }

    fn resolve(&self, name: &str) -> Result<Profile, CommandError> {
        self.directory
            .lookup(name)
            .filter(Profile::is_known)
            .ok_or_else(|| CommandError::UnknownPlayer(name.to_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use coffer_db::MemoryBalanceStore;

    use super::*;

    struct Names(HashMap<String, Profile>);

    impl Directory for Names {
        fn lookup(&self, name: &str) -> Option<Profile> {
            self.0.get(name).cloned()
        }
    }

    fn profile(name: &str, has_played_before: bool, online: bool) -> Profile {
        Profile {
            id: AccountId::new(),
            name: name.to_owned(),
            has_played_before,
            online,
        }
    }

    struct Fixture {
        store: Arc<MemoryBalanceStore>,
        economy: Arc<Economy<MemoryBalanceStore>>,
        commands: EconomyCommands<MemoryBalanceStore, Names>,
        alice: Profile,
        bob: Profile,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBalanceStore::new());
        let economy = Arc::new(Economy::new(Arc::clone(&store)));
        let alice = profile("Alice", true, true);
        let bob = profile("Bob", true, false);
        let ghost = profile("Ghost", false, false);
        let names = [&alice, &bob, &ghost]
            .into_iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let commands = EconomyCommands::new(Arc::clone(&economy), Names(names));
        Fixture {
            store,
            economy,
            commands,
            alice,
            bob,
        }
    }

    fn player(profile: &Profile, admin: bool) -> Sender {
        Sender::Player {
            profile: profile.clone(),
            admin,
        }
    }

    #[test]
    fn parse_amount_classifies_input() {
        assert_eq!(parse_amount("500").unwrap().get(), 500);
        assert_eq!(parse_amount("0").unwrap(), Balance::ZERO);
        assert_eq!(
            parse_amount("12.5"),
            Err(AmountError::NotWhole("12.5".to_owned()))
        );
        assert_eq!(parse_amount("-3"), Err(AmountError::NotWhole("-3".to_owned())));
        assert_eq!(
            parse_amount("abc"),
            Err(AmountError::NotANumber("abc".to_owned()))
        );
        assert_eq!(parse_amount(""), Err(AmountError::NotANumber(String::new())));
    }

    #[test]
    fn amount_error_messages() {
        assert_eq!(
            AmountError::NotWhole("12.5".to_owned()).to_string(),
            "Only able to set whole, positive numbers, tried '12.5'"
        );
        assert_eq!(
            AmountError::NotANumber("abc".to_owned()).to_string(),
            "Unable to set balance to a non-number, tried 'abc'"
        );
    }

    #[tokio::test]
    async fn view_own_balance() {
        let f = fixture();
        let sender = player(&f.alice, false);
        assert_eq!(f.commands.view(&sender, None).text, "Balance loading...");

        f.economy.on_join(f.alice.id, "Alice").await.unwrap();
        f.economy.set_balance(f.alice.id, 75).unwrap();
        let reply = f.commands.view(&sender, None);
        assert_eq!(reply.kind, ReplyKind::Info);
        assert_eq!(reply.text, "Balance: 75");
    }

    #[test]
    fn console_has_no_balance() {
        let f = fixture();
        let reply = f.commands.view(&Sender::Console, None);
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.text, "Console unable to view balance of self");
    }

    #[tokio::test]
    async fn view_other_balance() {
        let f = fixture();
        assert_eq!(
            f.commands.view(&Sender::Console, Some("Alice")).text,
            "Alice's balance is loading..."
        );
        f.economy.on_join(f.alice.id, "Alice").await.unwrap();
        assert_eq!(
            f.commands.view(&Sender::Console, Some("Alice")).text,
            "Alice's Balance: 0"
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let f = fixture();
        for name in ["Nobody", "Ghost"] {
            let reply = f.commands.view(&Sender::Console, Some(name));
            assert_eq!(reply.kind, ReplyKind::Error);
            assert_eq!(reply.text, format!("Unable to find player {name}"));
        }
    }

    #[tokio::test]
    async fn set_active_account_updates_cache_only() {
        let f = fixture();
        f.economy.on_join(f.alice.id, "Alice").await.unwrap();

        let reply = f.commands.set(&Sender::Console, "Alice", "500").await;
        assert_eq!(reply.kind, ReplyKind::Success);
        assert_eq!(reply.text, "Alice's balance has been set to 500");
        assert_eq!(f.economy.balance(f.alice.id).map(Balance::get), Some(500));
        assert_eq!(f.store.row(f.alice.id), Some(Balance::ZERO));
    }

    #[tokio::test]
    async fn set_inactive_account_writes_store() {
        let f = fixture();
        let reply = f.commands.set(&Sender::Console, "Bob", "40").await;
        assert_eq!(reply.text, "Bob's balance has been set to 40");
        assert_eq!(f.store.row(f.bob.id).map(Balance::get), Some(40));
        assert_eq!(f.economy.balance(f.bob.id), None);
    }

    #[tokio::test]
    async fn malformed_amounts_change_nothing() {
        let f = fixture();
        f.economy.on_join(f.alice.id, "Alice").await.unwrap();
        f.economy.set_balance(f.alice.id, 9).unwrap();

        let reply = f.commands.set(&Sender::Console, "Alice", "12.5").await;
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.text, "Only able to set whole, positive numbers, tried '12.5'");

        let reply = f.commands.set(&Sender::Console, "Alice", "abc").await;
        assert_eq!(reply.text, "Unable to set balance to a non-number, tried 'abc'");

        let reply = f.commands.set(&Sender::Console, "Alice", "-1").await;
        assert_eq!(reply.text, "Only able to set whole, positive numbers, tried '-1'");

        assert_eq!(f.economy.balance(f.alice.id).map(Balance::get), Some(9));
    }

    #[tokio::test]
    async fn set_requires_admin() {
        let f = fixture();
        f.economy.on_join(f.alice.id, "Alice").await.unwrap();

        let reply = f.commands.set(&player(&f.alice, false), "Alice", "1000").await;
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(
            reply.text,
            "I'm sorry, but you do not have permission to perform this command."
        );
        assert_eq!(f.economy.balance(f.alice.id), Some(Balance::ZERO));

        let reply = f.commands.set(&player(&f.alice, true), "Alice", "1000").await;
        assert_eq!(reply.kind, ReplyKind::Success);
    }

    #[tokio::test]
    async fn set_unknown_player() {
        let f = fixture();
        let reply = f.commands.set(&Sender::Console, "Nobody", "5").await;
        assert_eq!(reply.text, "Unable to find player Nobody");
        assert_eq!(f.store.row_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_for_inactive_target() {
        let f = fixture();
        f.store.set_online(false);
        let reply = f.commands.set(&Sender::Console, "Bob", "5").await;
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.text, "Failed to save Bob's balance");
    }
}
