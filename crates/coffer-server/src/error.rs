//! Error types for the server binary.

/// Top-level error for the server binary, propagated out of `main`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: coffer_core::ConfigError,
    },

    /// The balance store could not be brought up.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: coffer_db::DbError,
    },

    /// Reading the console or writing its output failed.
    #[error("console I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
