//! Ledger configuration.
//!
//! Read from `~/.trade-ledger/config.toml` (or `TRADE_LEDGER_CONFIG`), then
//! overridden by environment variables:
//!
//! | Variable | Effect |
//! |---|---|
//! | `TRADE_LEDGER_DB` | SQLite backend at this path |
//! | `TRADE_LEDGER_STARTING_BALANCE` | Cash for a newly created account |
//! | `TRADE_LEDGER_QUOTE_TIMEOUT_MS` | Quote lookup timeout |
//! | `TRADE_LEDGER_PASSWORD` | Shared secret for balance queries |

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "TRADE_LEDGER_CONFIG";
pub const DB_ENV: &str = "TRADE_LEDGER_DB";
pub const STARTING_BALANCE_ENV: &str = "TRADE_LEDGER_STARTING_BALANCE";
pub const QUOTE_TIMEOUT_ENV: &str = "TRADE_LEDGER_QUOTE_TIMEOUT_MS";
pub const PASSWORD_ENV: &str = "TRADE_LEDGER_PASSWORD";

/// Cash a freshly created account starts with.
pub const DEFAULT_STARTING_BALANCE: i64 = 10_000_000;

const DEFAULT_QUOTE_TIMEOUT_MS: u64 = 5_000;

/// Which ledger backend to open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Ephemeral, lost on exit
    Memory,
    /// Durable SQLite database file
    Sqlite {
        #[serde(default = "default_db_path")]
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            path: default_db_path(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    /// Only used when the account row is first created
    pub starting_balance: i64,
    pub account_name: String,
    pub quote_timeout_ms: u64,
    /// Shared secret required by balance queries, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_password: Option<String>,
    /// TOML quote table for the static resolver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quotes_file: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            starting_balance: DEFAULT_STARTING_BALANCE,
            account_name: "main".to_string(),
            quote_timeout_ms: DEFAULT_QUOTE_TIMEOUT_MS,
            account_password: None,
            quotes_file: None,
        }
    }
}

fn data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".trade-ledger"))
        .unwrap_or_else(|| PathBuf::from(".trade-ledger"))
}

/// Default SQLite database location. `TRADE_LEDGER_DB` is applied later, by
/// [`LedgerConfig::apply_overrides`].
pub fn default_db_path() -> PathBuf {
    data_dir().join("ledger.db")
}

impl LedgerConfig {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        data_dir().join("config.toml")
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_path())
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = Self::from_path(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file without consulting the environment.
    ///
    /// A missing file yields the defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Parse TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup(DB_ENV) {
            self.store = StoreConfig::Sqlite {
                path: PathBuf::from(path),
            };
        }
        if let Some(raw) = lookup(STARTING_BALANCE_ENV) {
            self.starting_balance = parse_var(STARTING_BALANCE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(QUOTE_TIMEOUT_ENV) {
            self.quote_timeout_ms = parse_var(QUOTE_TIMEOUT_ENV, &raw)?;
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.account_password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.starting_balance < 0 {
            return Err(Error::Config(format!(
                "starting_balance must not be negative, got {}",
                self.starting_balance
            )));
        }
        if self.quote_timeout_ms == 0 {
            return Err(Error::Config("quote_timeout_ms must be positive".to_string()));
        }
        if self.account_name.trim().is_empty() {
            return Err(Error::Config("account_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    /// Check a caller-supplied secret against the configured one.
    ///
    /// With no password configured every caller is allowed.
    pub fn authorize(&self, provided: Option<&str>) -> Result<()> {
        match &self.account_password {
            Some(expected) if provided != Some(expected.as_str()) => Err(Error::Unauthorized),
            _ => Ok(()),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config.starting_balance, 10_000_000);
        assert_eq!(config.account_name, "main");
        assert_eq!(config.quote_timeout(), Duration::from_secs(5));
        assert!(matches!(config.store, StoreConfig::Sqlite { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_backend() {
        let config = LedgerConfig::from_toml_str(
            r#"
            starting_balance = 5000
            quote_timeout_ms = 250

            [store]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.starting_balance, 5_000);
        assert_eq!(config.quote_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_sqlite_backend_path() {
        let config = LedgerConfig::from_toml_str(
            r#"
            account_password = "0000"
            quotes_file = "/srv/quotes.toml"

            [store]
            backend = "sqlite"
            path = "/var/lib/ledger.db"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/ledger.db")
            }
        );
        assert_eq!(config.account_password.as_deref(), Some("0000"));
        assert_eq!(config.quotes_file, Some(PathBuf::from("/srv/quotes.toml")));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = LedgerConfig::from_toml_str("[store]\nbackend = \"postgres\"\n");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = LedgerConfig::default();
        config
            .apply_overrides(lookup(&[
                (DB_ENV, "/tmp/override.db"),
                (STARTING_BALANCE_ENV, "42"),
                (QUOTE_TIMEOUT_ENV, "100"),
                (PASSWORD_ENV, "secret"),
            ]))
            .unwrap();

        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/override.db")
            }
        );
        assert_eq!(config.starting_balance, 42);
        assert_eq!(config.quote_timeout_ms, 100);
        assert_eq!(config.account_password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_override() {
        let mut config = LedgerConfig::default();
        let result = config.apply_overrides(lookup(&[(STARTING_BALANCE_ENV, "lots")]));
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(STARTING_BALANCE_ENV)));
    }

    #[test]
    fn test_validate() {
        let mut config = LedgerConfig {
            starting_balance: -1,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.starting_balance = 0;
        config.quote_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_authorize() {
        let open = LedgerConfig::default();
        assert!(open.authorize(None).is_ok());

        let locked = LedgerConfig {
            account_password: Some("0000".to_string()),
            ..LedgerConfig::default()
        };
        assert!(locked.authorize(Some("0000")).is_ok());
        assert!(matches!(locked.authorize(Some("1234")), Err(Error::Unauthorized)));
        assert!(matches!(locked.authorize(None), Err(Error::Unauthorized)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LedgerConfig::from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, LedgerConfig::default());
    }

    #[test]
    fn test_default_db_path_ignores_environment() {
        let config = LedgerConfig::default();
        let expected = StoreConfig::Sqlite {
            path: data_dir().join("ledger.db"),
        };
        assert_eq!(config.store, expected);
        assert_eq!(
            LedgerConfig::from_toml_str("[store]\nbackend = \"sqlite\"\n").unwrap().store,
            expected
        );
    }

    #[test]
    fn test_file_values_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "starting_balance = 7\n[store]\nbackend = \"memory\"\n").unwrap();

        let mut config = LedgerConfig::from_path(&path).unwrap();
        assert_eq!(config.starting_balance, 7);
        assert_eq!(config.store, StoreConfig::Memory);

        config.apply_overrides(lookup(&[(DB_ENV, "/tmp/env.db")])).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/env.db")
            }
        );
    }
}
