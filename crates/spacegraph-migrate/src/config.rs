//! Configuration for the migration runner.

use std::time::Duration;

use serde::Deserialize;
use spacegraph_core::config::{self as core_config, Neo4jSettings};
use spacegraph_core::ids::{HashedScheme, PrefixSwapScheme};
use spacegraph_core::IdentifierScheme;

use crate::error::Result;

/// Migration tuning.
///
/// Loaded from the `[migrate]` section of `spacegraph.toml` or
/// `SPACEGRAPH__MIGRATE__*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MigrateConfig {
    /// Rows fetched per selection page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between per-item writes and between schema statements.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Upper bound on any single store operation.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,

    #[serde(default)]
    pub identifier_scheme: SchemeKind,

    /// Name given to synthesized organization default spaces.
    #[serde(default = "default_space_name")]
    pub default_space_name: String,
}

/// Which identifier derivation the backfill uses for synthesized ids.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    #[default]
    PrefixSwap,
    Hashed,
}

impl SchemeKind {
    pub fn scheme(&self) -> Box<dyn IdentifierScheme> {
        match self {
            Self::PrefixSwap => Box::new(PrefixSwapScheme),
            Self::Hashed => Box::new(HashedScheme),
        }
    }
}

/// Per-step execution limits derived from [`MigrateConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOptions {
    pub batch_size: usize,
    pub throttle: Duration,
    pub query_timeout: Duration,
}

impl Default for StepOptions {
    fn default() -> Self {
        MigrateConfig::default().step_options()
    }
}

fn default_batch_size() -> usize {
    500
}

fn default_throttle_ms() -> u64 {
    25
}

fn default_query_timeout() -> u64 {
    30
}

fn default_journal_dir() -> String {
    "./migration-journal".to_string()
}

fn default_space_name() -> String {
    "Default".to_string()
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            throttle_ms: default_throttle_ms(),
            query_timeout_secs: default_query_timeout(),
            journal_dir: default_journal_dir(),
            identifier_scheme: SchemeKind::default(),
            default_space_name: default_space_name(),
        }
    }
}

impl MigrateConfig {
    pub fn step_options(&self) -> StepOptions {
        StepOptions {
            batch_size: self.batch_size.max(1),
            throttle: Duration::from_millis(self.throttle_ms),
            query_timeout: Duration::from_secs(self.query_timeout_secs.max(1)),
        }
    }
}

/// Everything the CLI needs from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub neo4j: Neo4jSettings,
    pub migrate: MigrateConfig,
}

/// Load `[neo4j]` and `[migrate]` from `<file_prefix>.toml` and the environment.
pub fn load_settings(file_prefix: &str) -> Result<Settings> {
    let cfg = core_config::load(file_prefix)?;
    Ok(Settings {
        neo4j: core_config::section(&cfg, "neo4j")?,
        migrate: core_config::section(&cfg, "migrate")?,
    })
}
