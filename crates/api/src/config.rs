//! Process configuration, read once from the environment at startup.

use thiserror::Error;

use stockflow_infra::services::{DEFAULT_MAX_CONCURRENCY_RETRIES, ServiceConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SEED_ORGANIZATIONS: &str = "demo";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} is required when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub max_concurrency_retries: u32,
    /// Organization slugs registered in the in-memory directory at startup.
    pub seed_organizations: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            use_persistent_stores: false,
            database_url: None,
            max_concurrency_retries: DEFAULT_MAX_CONCURRENCY_RETRIES,
            seed_organizations: parse_slugs(DEFAULT_SEED_ORGANIZATIONS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup (the environment in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("STOCKFLOW_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let use_persistent_stores = match lookup("USE_PERSISTENT_STORES") {
            None => false,
            Some(v) => v.trim().parse::<bool>().map_err(|_| ConfigError::Invalid {
                name: "USE_PERSISTENT_STORES",
                expected: "true or false",
                value: v,
            })?,
        };

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let max_concurrency_retries = match lookup("STOCKFLOW_MAX_CONCURRENCY_RETRIES") {
            None => DEFAULT_MAX_CONCURRENCY_RETRIES,
            Some(v) => v.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "STOCKFLOW_MAX_CONCURRENCY_RETRIES",
                expected: "a non-negative integer",
                value: v,
            })?,
        };

        let seed_organizations = parse_slugs(
            &lookup("STOCKFLOW_SEED_ORGANIZATIONS").unwrap_or_else(|| DEFAULT_SEED_ORGANIZATIONS.to_string()),
        );

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            max_concurrency_retries,
            seed_organizations,
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_concurrency_retries: self.max_concurrency_retries,
        }
    }
}

fn parse_slugs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
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
    fn defaults_apply_when_nothing_is_set() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.seed_organizations, vec!["demo".to_string()]);
    }

    #[test]
    fn persistent_mode_needs_a_database_url() {
        let err = AppConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let config = AppConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stockflow"),
        ]))
        .unwrap();
        assert!(config.use_persistent_stores);
    }

    #[test]
    fn seed_slugs_are_trimmed_and_blank_entries_dropped() {
        let config = AppConfig::from_lookup(lookup(&[("STOCKFLOW_SEED_ORGANIZATIONS", " acme, ,globex ")])).unwrap();
        assert_eq!(config.seed_organizations, vec!["acme".to_string(), "globex".to_string()]);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("STOCKFLOW_MAX_CONCURRENCY_RETRIES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STOCKFLOW_MAX_CONCURRENCY_RETRIES", .. }));
    }
}
