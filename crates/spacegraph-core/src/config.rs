//! Configuration management for spacegraph tools.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`SPACEGRAPH__` prefix, `__` separator)
//! 2. Config file (`spacegraph.toml`, prefix overridable)
//! 3. Defaults

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::SpacegraphError;

/// Environment variable prefix for every spacegraph setting.
pub const ENV_PREFIX: &str = "SPACEGRAPH";

/// Connection parameters for the graph store.
///
/// Loaded from the `[neo4j]` section or `SPACEGRAPH__NEO4J__*` variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Neo4jSettings {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Target logical database name.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Timeout for establishing and verifying the initial connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Build the layered configuration source for a file prefix.
pub fn load(file_prefix: &str) -> Result<config::Config, SpacegraphError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg)
}

/// Deserialize one section, falling back to its defaults when absent.
pub fn section<T>(cfg: &config::Config, name: &str) -> Result<T, SpacegraphError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(name) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section = name, "Config section absent, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neo4j_defaults() {
        let settings = Neo4jSettings::default();
        assert_eq!(settings.uri, "bolt://localhost:7687");
        assert_eq!(settings.database, "neo4j");
        assert_eq!(settings.connect_timeout_secs, 10);
    }

    #[test]
    fn missing_section_uses_defaults() {
        let cfg = config::Config::builder().build().unwrap();
        let settings: Neo4jSettings = section(&cfg, "neo4j").unwrap();
        assert_eq!(settings, Neo4jSettings::default());
    }

    #[test]
    fn partial_section_fills_remaining_defaults() {
        let cfg = config::Config::builder()
            .set_override("neo4j.uri", "bolt://graph:7687")
            .unwrap()
            .set_override("neo4j.database", "tenancy")
            .unwrap()
            .build()
            .unwrap();
        let settings: Neo4jSettings = section(&cfg, "neo4j").unwrap();
        assert_eq!(settings.uri, "bolt://graph:7687");
        assert_eq!(settings.database, "tenancy");
        assert_eq!(settings.user, "neo4j");
    }
}
