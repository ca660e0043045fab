use thiserror::Error;

use crate::ids::DeriveError;

/// Top-level error type for the spacegraph vocabulary crate.
#[derive(Error, Debug)]
pub enum SpacegraphError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid run identifier: {0:?} (expected [A-Za-z0-9_-]+)")]
    InvalidRunId(String),

    #[error("Unknown entity kind: {0}")]
    UnknownEntity(String),

    #[error("Unsupported property value at {path}: {reason}")]
    InvalidProperty { path: String, reason: String },

    #[error("Identifier derivation failed: {0}")]
    Derive(#[from] DeriveError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
