//! Engine configuration, read from the environment.

use std::time::Duration;

use thiserror::Error;

use forgeledger_accounting::PostingAccounts;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Postgres connection string; `None` means the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Deadline for one engine operation, transaction included.
    pub operation_timeout: Duration,
    /// How long a transaction set may stay draft before it counts as stale.
    pub draft_grace_period: Duration,
    pub posting_accounts: PostingAccounts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            operation_timeout: Duration::from_millis(5_000),
            draft_grace_period: Duration::from_secs(300),
            posting_accounts: PostingAccounts::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup("FORGELEDGER_DB_MAX_CONNECTIONS") {
            let n: u32 = parse("FORGELEDGER_DB_MAX_CONNECTIONS", &raw)?;
            if n == 0 {
                return Err(invalid("FORGELEDGER_DB_MAX_CONNECTIONS", &raw, "must be at least 1"));
            }
            config.max_connections = n;
        }
        if let Some(raw) = lookup("FORGELEDGER_OPERATION_TIMEOUT_MS") {
            let ms: u64 = parse("FORGELEDGER_OPERATION_TIMEOUT_MS", &raw)?;
            if ms == 0 {
                return Err(invalid("FORGELEDGER_OPERATION_TIMEOUT_MS", &raw, "must be positive"));
            }
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("FORGELEDGER_DRAFT_GRACE_SECS") {
            config.draft_grace_period =
                Duration::from_secs(parse("FORGELEDGER_DRAFT_GRACE_SECS", &raw)?);
        }

        let accounts = &mut config.posting_accounts;
        for (var, slot) in [
            ("FORGELEDGER_ACCOUNT_CASH", &mut accounts.cash),
            ("FORGELEDGER_ACCOUNT_RECEIVABLE", &mut accounts.receivable),
            ("FORGELEDGER_ACCOUNT_PAYABLE", &mut accounts.payable),
            ("FORGELEDGER_ACCOUNT_REVENUE", &mut accounts.revenue),
            ("FORGELEDGER_ACCOUNT_PURCHASES", &mut accounts.purchases),
            ("FORGELEDGER_ACCOUNT_TAX_PAYABLE", &mut accounts.tax_payable),
            ("FORGELEDGER_ACCOUNT_TAX_RECEIVABLE", &mut accounts.tax_receivable),
        ] {
            if let Some(code) = lookup(var) {
                if code.trim().is_empty() {
                    return Err(invalid(var, &code, "account code cannot be empty"));
                }
                *slot = code.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing { var: "DATABASE_URL" })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, raw, &e.to_string()))
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("FORGELEDGER_DB_MAX_CONNECTIONS", "4"),
            ("FORGELEDGER_OPERATION_TIMEOUT_MS", "250"),
            ("FORGELEDGER_DRAFT_GRACE_SECS", "60"),
            ("FORGELEDGER_ACCOUNT_CASH", "1010"),
        ]))
        .unwrap();
        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/ledger");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.draft_grace_period, Duration::from_secs(60));
        assert_eq!(config.posting_accounts.cash, "1010");
        assert_eq!(config.posting_accounts.receivable, "1200");
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = EngineConfig::from_lookup(lookup(&[("FORGELEDGER_OPERATION_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "FORGELEDGER_OPERATION_TIMEOUT_MS", .. }
        ));

        assert!(EngineConfig::from_lookup(lookup(&[("FORGELEDGER_DB_MAX_CONNECTIONS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("FORGELEDGER_ACCOUNT_CASH", " ")])).is_err());
    }
}
