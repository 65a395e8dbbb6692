//! Line-based operator console.
//!
//! Stands in for the host application: `join` and `quit` lines raise the
//! lifecycle events a real host would raise on connect and disconnect, and
//! the remaining commands go through the same command layer a chat
//! interface would use.
//!
//! ```text
//! join <uuid> <name>      account connects
//! quit <uuid>             account disconnects
//! bal [name]              view a balance
//! setbal <name> <amount>  set a balance (admin)
//! accounts                list every stored account
//! help                    show this list
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use coffer_core::{Directory, Economy, EconomyCommands, Profile, Sender};
use coffer_db::BalanceStore;
use coffer_types::AccountId;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ServerError;

const HELP: &str = "commands: join <uuid> <name> | quit <uuid> | bal [name] | setbal <name> <amount> | accounts | help";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// An account connected.
    Join {
        /// Connecting account.
        account: AccountId,
        /// Its display name.
        name: String,
    },
    /// An account disconnected.
    Quit {
        /// Disconnecting account.
        account: AccountId,
    },
    /// View a balance.
    Balance {
        /// Whose balance; `None` means the sender's own.
        name: Option<String>,
    },
    /// Set a balance.
    SetBalance {
        /// Target display name.
        name: String,
        /// Raw amount argument.
        amount: String,
    },
    /// List every stored account.
    Accounts,
    /// Show usage.
    Help,
}

/// A console line that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// First word is not a command.
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    /// Wrong number of arguments.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// Account argument is not a UUID.
    #[error("invalid account id '{0}'")]
    BadAccount(String),
}

/// Parse one console line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`ParseError`] if the line is not a well-formed command.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (head.to_ascii_lowercase().as_str(), args) {
        ("join", [account, name]) => Command::Join {
            account: parse_account(account)?,
            name: (*name).to_owned(),
        },
        ("join", _) => return Err(ParseError::Usage("join <uuid> <name>")),
        ("quit", [account]) => Command::Quit {
            account: parse_account(account)?,
        },
        ("quit", _) => return Err(ParseError::Usage("quit <uuid>")),
        ("bal" | "balance", []) => Command::Balance { name: None },
        ("bal" | "balance", [name]) => Command::Balance {
            name: Some((*name).to_owned()),
        },
        ("bal" | "balance", _) => return Err(ParseError::Usage("bal [name]")),
        ("setbal" | "setbalance", [name, amount]) => Command::SetBalance {
            name: (*name).to_owned(),
            amount: (*amount).to_owned(),
        },
        ("setbal" | "setbalance", _) => return Err(ParseError::Usage("setbal <name> <amount>")),
        ("accounts", []) => Command::Accounts,
        ("accounts", _) => return Err(ParseError::Usage("accounts")),
        ("help", _) => Command::Help,
        (other, _) => return Err(ParseError::Unknown(other.to_owned())),
    };
    Ok(Some(command))
}

fn parse_account(raw: &str) -> Result<AccountId, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::BadAccount(raw.to_owned()))
}

/// Names seen during this session, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl SessionDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connect under `name`.
    pub fn record_join(&self, account: AccountId, name: &str) {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        profiles.retain(|_, p| p.id != account);
        profiles.insert(
            name.to_lowercase(),
            Profile {
                id: account,
                name: name.to_owned(),
                has_played_before: true,
                online: true,
            },
        );
    }

    /// Record a disconnect. Returns the account's name if it was seen.
    pub fn record_quit(&self, account: AccountId) -> Option<String> {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        profiles.values_mut().find(|p| p.id == account).map(|p| {
            p.online = false;
            p.name.clone()
        })
    }
}

impl Directory for SessionDirectory {
    fn lookup(&self, name: &str) -> Option<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_lowercase())
            .cloned()
    }
}

/// Console driver over one economy.
pub struct Console<S> {
    economy: Arc<Economy<S>>,
    commands: EconomyCommands<S, SessionDirectory>,
}

impl<S: BalanceStore> Console<S> {
    /// Create a console with an empty session directory.
    pub fn new(economy: Arc<Economy<S>>) -> Self {
        let commands = EconomyCommands::new(Arc::clone(&economy), SessionDirectory::new());
        Self { economy, commands }
    }

    /// Run one command and render its output.
    ///
    /// `join` and `quit` return as soon as the event is raised; the load or
    /// save completes in the background.
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Join { account, name } => {
                self.commands.directory().record_join(account, &name);
                drop(self.economy.on_join(account, &name));
                format!("{name} joined")
            }
            Command::Quit { account } => {
                let label = self
                    .commands
                    .directory()
                    .record_quit(account)
                    .unwrap_or_else(|| account.to_string());
                drop(self.economy.on_quit(account, &label));
                format!("{label} left")
            }
            Command::Balance { name } => self.commands.view(&Sender::Console, name.as_deref()).text,
            Command::SetBalance { name, amount } => {
                self.commands.set(&Sender::Console, &name, &amount).await.text
            }
            Command::Accounts => match self.economy.known_identities().await {
                Ok(accounts) => {
                    let mut out = format!("{} stored accounts", accounts.len());
                    for account in accounts {
                        out.push_str("\n  ");
                        out.push_str(&account.to_string());
                    }
                    out
                }
                Err(e) => {
                    tracing::warn!(error = %e, "account listing failed");
                    format!("Unable to list accounts: {e}")
                }
            },
            Command::Help => HELP.to_owned(),
        }
    }

    /// Read commands until the input ends or `stop` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if reading input or writing output fails.
    pub async fn run<R, W, F>(&self, input: R, mut output: W, stop: F) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(stop);

        loop {
            let line = tokio::select! {
                () = &mut stop => {
                    tracing::info!("interrupt received, leaving console");
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::info!("console input closed");
                break;
            };

            let text = match parse_line(&line) {
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => continue,
                Err(e) => e.to_string(),
            };
            output.write_all(text.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok(())
    }
}
