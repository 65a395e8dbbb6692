//! Error types for the persistence layer.
//!
//! All store failures surface as [`DbError`]. Callers at the store boundary
//! log these and convert them into absent or failed results; nothing here is
//! meant to unwind the host process.

use std::fmt;

/// Stage of the store initialization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// `CREATE DATABASE IF NOT EXISTS` against a server-scoped connection.
    CreateDatabase,
    /// `CREATE TABLE IF NOT EXISTS` against the database-scoped connection.
    CreateTable,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDatabase => f.write_str("create database"),
            Self::CreateTable => f.write_str("create table"),
        }
    }
}

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A MySQL operation failed.
    #[error("MySQL error: {0}")]
    MySql(#[from] sqlx::Error),

    /// No live connection is held and re-establishing one failed.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A stage of the initialization pipeline failed.
    #[error("store initialization failed at {stage}: {source}")]
    Init {
        /// The stage that failed.
        stage: InitStage,
        /// The underlying failure.
        #[source]
        source: Box<Self>,
    },

    /// A stored row violates the balance invariants.
    #[error("corrupt row for {key}: {reason}")]
    CorruptRow {
        /// The primary key of the offending row.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Wrap this error as a failure of the given init stage.
    #[must_use]
    pub fn at_stage(self, stage: InitStage) -> Self {
        Self::Init {
            stage,
            source: Box::new(self),
        }
    }

    /// Whether this error indicates the connection itself is unusable.
    ///
    /// Such errors mark the held connection dead so the next operation
    /// reconnects before preparing a statement.
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable(_)
                | Self::MySql(
                    sqlx::Error::Io(_)
                        | sqlx::Error::Tls(_)
                        | sqlx::Error::Protocol(_)
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::PoolTimedOut
                        | sqlx::Error::WorkerCrashed
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_error_names_stage() {
        let err = DbError::ConnectionUnavailable("refused".to_owned())
            .at_stage(InitStage::CreateTable);
        assert_eq!(
            err.to_string(),
            "store initialization failed at create table: connection unavailable: refused"
        );
    }

    #[test]
    fn classifies_connection_errors() {
        assert!(DbError::ConnectionUnavailable(String::new()).is_connection_error());
        assert!(DbError::MySql(sqlx::Error::PoolTimedOut).is_connection_error());
        assert!(!DbError::MySql(sqlx::Error::RowNotFound).is_connection_error());
        assert!(!DbError::Config(String::new()).is_connection_error());
    }
}
