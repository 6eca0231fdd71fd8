//! Persistence configuration loaded from the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::IsolationLevel;

pub const DATABASE_URL_KEY: &str = "GUARDRAIL_DATABASE_URL";
pub const FALLBACK_DATABASE_URL_KEY: &str = "DATABASE_URL";
pub const ISOLATION_LEVEL_KEY: &str = "GUARDRAIL_ISOLATION_LEVEL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Connection string for SQL-backed ports. `None` selects the in-memory engine.
    pub database_url: Option<String>,
    /// Isolation level used by `begin_default_transaction`.
    pub default_isolation_level: IsolationLevel,
}

impl PersistenceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get(DATABASE_URL_KEY).or_else(|| get(FALLBACK_DATABASE_URL_KEY));

        let default_isolation_level = match get(ISOLATION_LEVEL_KEY) {
            Some(raw) => raw.parse::<IsolationLevel>().map_err(|_| ConfigError::InvalidValue {
                key: ISOLATION_LEVEL_KEY,
                value: raw,
            })?,
            None => IsolationLevel::default(),
        };

        Ok(Self {
            database_url,
            default_isolation_level,
        })
    }

    pub fn uses_database(&self) -> bool {
        self.database_url.is_some()
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory_read_committed() {
        let config = PersistenceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PersistenceConfig::default());
        assert_eq!(config.default_isolation_level, IsolationLevel::ReadCommitted);
        assert!(!config.uses_database());
    }

    #[test]
    fn prefers_the_prefixed_url() {
        let config = PersistenceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://fallback"),
            ("GUARDRAIL_DATABASE_URL", "postgres://primary"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://primary"));

        let fallback = PersistenceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://fallback"),
            ("GUARDRAIL_DATABASE_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(fallback.database_url.as_deref(), Some("postgres://fallback"));
    }

    #[test]
    fn rejects_unknown_isolation_level() {
        let err = PersistenceConfig::from_lookup(lookup(&[("GUARDRAIL_ISOLATION_LEVEL", "chaos")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ISOLATION_LEVEL_KEY,
                value: "chaos".to_string(),
            }
        );
    }

    #[test]
    fn parses_isolation_level() {
        let config =
            PersistenceConfig::from_lookup(lookup(&[("GUARDRAIL_ISOLATION_LEVEL", "serializable")])).unwrap();
        assert_eq!(config.default_isolation_level, IsolationLevel::Serializable);
    }
}
