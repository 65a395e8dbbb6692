//! MySQL connection configuration and the shared connection handle.
//!
//! The store talks to MySQL over a single owned connection. The handle is
//! shared process-wide behind an async mutex; every operation goes through
//! [`SqlConnection::acquire`], which reconnects inline when the held
//! connection is missing or has been marked dead. Liveness is tracked in an
//! atomic flag so [`SqlConnection::is_live`] never blocks.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::DbError;

/// Default MySQL server port.
pub const DEFAULT_PORT: u16 = 3306;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Configuration for reaching the MySQL server.
#[derive(Clone)]
pub struct MySqlConfig {
    /// Server host name, e.g. `localhost`.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database holding the `economy` table.
    pub database: String,
    /// Login user. May be empty.
    pub username: String,
    /// Login password. Empty means no password is sent.
    pub password: String,
    /// Upper bound on establishing a single connection.
    pub connect_timeout: Duration,
}

impl MySqlConfig {
    /// Create a configuration for `host` and `database` with empty
    /// credentials and the default port.
    pub fn new(host: &str, database: &str) -> Self {
        Self {
            host: host.to_owned(),
            port: DEFAULT_PORT,
            database: database.to_owned(),
            username: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set the login credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        username.clone_into(&mut self.username);
        password.clone_into(&mut self.password);
        self
    }

    /// Set the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address of the server without a database selected: `<host>:<port>/`.
    pub fn server_url(&self) -> String {
        format!("{}:{}/", self.host, self.port)
    }

    /// Address of the economy database: `<host>:<port>/<database>`.
    pub fn database_url(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// Check that the database name can be safely spliced into DDL.
    ///
    /// `CREATE DATABASE` cannot take a bound parameter, so the name is
    /// restricted to unquoted-identifier characters.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the name is empty, too long, or
    /// contains anything outside `[A-Za-z0-9_$]`.
    pub fn validate(&self) -> Result<(), DbError> {
        let name = self.database.as_str();
        if name.is_empty() || name.len() > 64 {
            return Err(DbError::Config(format!(
                "database name must be 1-64 characters, got {}",
                name.len()
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        {
            return Err(DbError::Config(format!(
                "database name {name:?} contains unsupported character {bad:?}"
            )));
        }
        if self.host.is_empty() {
            return Err(DbError::Config("sql host must not be empty".to_owned()));
        }
        Ok(())
    }

    fn connect_options(&self, scope: ConnectionScope) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        if scope == ConnectionScope::Database {
            options = options.database(&self.database);
        }
        options
    }
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Which part of the server a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionScope {
    /// Connected to the server with no database selected.
    Server,
    /// Connected with the economy database selected.
    Database,
}

struct Held {
    conn: Option<MySqlConnection>,
    scope: ConnectionScope,
}

/// Single shared MySQL connection with lazy, inline reconnection.
pub struct SqlConnection {
    config: MySqlConfig,
    held: Mutex<Held>,
    live: AtomicBool,
}

impl SqlConnection {
    /// Create a handle. No connection is opened until first use.
    pub fn new(config: MySqlConfig, scope: ConnectionScope) -> Self {
        Self {
            config,
            held: Mutex::new(Held { conn: None, scope }),
            live: AtomicBool::new(false),
        }
    }

    /// The configuration this handle connects with.
    pub const fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Last known connection health. Never blocks.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Borrow the live connection, reconnecting first if it is missing or
    /// was marked dead.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionUnavailable`] if a new connection cannot
    /// be established.
    pub async fn acquire(&self) -> Result<MappedMutexGuard<'_, MySqlConnection>, DbError> {
        let mut held = self.held.lock().await;
        if held.conn.is_none() || !self.is_live() {
            self.open(&mut held).await?;
        }
        MutexGuard::try_map(held, |h| h.conn.as_mut()).map_err(|guard| {
            drop(guard);
            DbError::ConnectionUnavailable("connection vanished after open".to_owned())
        })
    }

    /// Borrow the held connection only if it is believed live. Never
    /// reconnects; used by the health probe.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionUnavailable`] if no live connection is held.
    pub async fn current(&self) -> Result<MappedMutexGuard<'_, MySqlConnection>, DbError> {
        let held = self.held.lock().await;
        if !self.is_live() {
            return Err(DbError::ConnectionUnavailable(
                "no live connection held".to_owned(),
            ));
        }
        MutexGuard::try_map(held, |h| h.conn.as_mut()).map_err(|guard| {
            drop(guard);
            DbError::ConnectionUnavailable("no connection held".to_owned())
        })
    }

    /// Drop the held connection and open a fresh one in the current scope.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionUnavailable`] if the new connection
    /// cannot be established. The handle is left without a connection.
    pub async fn reconnect(&self) -> Result<(), DbError> {
        let mut held = self.held.lock().await;
        self.open(&mut held).await
    }

    /// Close the held connection and re-acquire one bound to `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionUnavailable`] if the new connection
    /// cannot be established.
    pub async fn rescope(&self, scope: ConnectionScope) -> Result<(), DbError> {
        let mut held = self.held.lock().await;
        if let Some(old) = held.conn.take() {
            if let Err(e) = old.close().await {
                tracing::debug!(error = %e, "closing previous connection failed");
            }
        }
        held.scope = scope;
        self.open(&mut held).await
    }

    /// Record the outcome of an operation on the connection. Connection-level
    /// failures mark the handle dead so the next [`acquire`](Self::acquire)
    /// reconnects.
    pub fn observe<T>(&self, result: &Result<T, DbError>) {
        if let Err(e) = result {
            if e.is_connection_error() {
                self.mark_dead();
            }
        }
    }

    /// Flag the held connection as dead.
    pub fn mark_dead(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                url = %self.config.database_url(),
                "MySQL connection marked dead"
            );
        }
    }

    /// Gracefully close the held connection, if any.
    pub async fn close(&self) {
        let mut held = self.held.lock().await;
        self.live.store(false, Ordering::Release);
        if let Some(conn) = held.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "closing connection failed");
            }
        }
        tracing::info!("MySQL connection closed");
    }

    async fn open(&self, held: &mut Held) -> Result<(), DbError> {
        // A dead connection may hang on a graceful close; just drop it.
        held.conn = None;
        self.live.store(false, Ordering::Release);

        let url = match held.scope {
            ConnectionScope::Server => self.config.server_url(),
            ConnectionScope::Database => self.config.database_url(),
        };
        let options = self.config.connect_options(held.scope);
        let connected =
            tokio::time::timeout(self.config.connect_timeout, MySqlConnection::connect_with(&options))
                .await;

        match connected {
            Ok(Ok(conn)) => {
                held.conn = Some(conn);
                self.live.store(true, Ordering::Release);
                tracing::debug!(url = %url, scope = ?held.scope, "MySQL connection established");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "unable to establish MySQL connection");
                Err(DbError::ConnectionUnavailable(format!("{url}: {e}")))
            }
            Err(elapsed) => {
                tracing::warn!(
                    url = %url,
                    timeout_ms = self.config.connect_timeout.as_millis(),
                    "MySQL connection attempt timed out"
                );
                Err(DbError::ConnectionUnavailable(format!("{url}: {elapsed}")))
            }
        }
    }
}
