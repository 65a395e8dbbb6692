//! Configuration loading for the Coffer economy.
//!
//! The configuration lives in `economy-config.yaml`. Only connection details
//! for the balance database and the health probe cadence are recognized;
//! every field has a default so an empty or missing file is valid.
//!
//! ```yaml
//! sql:
//!   host: "localhost"
//!   database: "economyDatabase"
//!   username: ""
//!   password: ""
//! health:
//!   probe_interval_secs: 10
//! ```

use std::path::Path;
use std::time::Duration;

use coffer_db::MySqlConfig;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level economy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EconomyConfig {
    /// Balance database connection.
    #[serde(default)]
    pub sql: SqlConfig,

    /// Connection health probing.
    #[serde(default)]
    pub health: HealthConfig,
}

impl EconomyConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides (see [`SqlConfig::apply_env_overrides`]).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::resolve(&contents, |name| std::env::var(name).ok())
    }

    /// Defaults plus environment overrides, for running without a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.sql.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is unusable.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_unvalidated(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse, apply overrides from `lookup`, then validate the result. A
    /// bad file value is acceptable as long as an override replaces it.
    fn resolve(yaml: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::parse_unvalidated(yaml)?;
        config.sql.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    fn parse_unvalidated(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml reads an empty document as unit, not an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Connection settings for the store.
    pub fn mysql(&self) -> MySqlConfig {
        MySqlConfig::new(&self.sql.host, &self.sql.database)
            .with_credentials(&self.sql.username, &self.sql.password)
    }

    /// Time between health probes.
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.health.probe_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.health.probe_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "health.probe_interval_secs",
                reason: "must be at least 1".to_owned(),
            });
        }
        self.mysql()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                field: "sql",
                reason: e.to_string(),
            })
    }
}

/// Balance database connection settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SqlConfig {
    /// Server host name.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database holding the balance table.
    #[serde(default = "default_database")]
    pub database: String,

    /// Login user.
    #[serde(default)]
    pub username: String,

    /// Login password.
    #[serde(default)]
    pub password: String,
}

impl SqlConfig {
    /// Override fields from the process environment:
    /// - `ECONOMY_SQL_HOST` overrides `sql.host`
    /// - `ECONOMY_SQL_DATABASE` overrides `sql.database`
    /// - `ECONOMY_SQL_USERNAME` overrides `sql.username`
    /// - `ECONOMY_SQL_PASSWORD` overrides `sql.password`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("ECONOMY_SQL_HOST") {
            self.host = val;
        }
        if let Some(val) = lookup("ECONOMY_SQL_DATABASE") {
            self.database = val;
        }
        if let Some(val) = lookup("ECONOMY_SQL_USERNAME") {
            self.username = val;
        }
        if let Some(val) = lookup("ECONOMY_SQL_PASSWORD") {
            self.password = val;
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            database: default_database(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl std::fmt::Debug for SqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConfig")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Health probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthConfig {
    /// Seconds between connection probes.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_database() -> String {
    "economyDatabase".to_owned()
}

const fn default_probe_interval_secs() -> u64 {
    coffer_db::DEFAULT_PROBE_INTERVAL.as_secs()
}
