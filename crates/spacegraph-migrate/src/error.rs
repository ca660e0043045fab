//! Error types for the spacegraph-migrate crate.

use spacegraph_core::SpacegraphError;
use spacegraph_graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Core(#[from] SpacegraphError),

    #[error("Rollback refused: {reason}")]
    RollbackRefused { reason: String },

    #[error("Rollback refused: no edges, nodes, or fields carry run id {0}")]
    UnknownRun(String),

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, MigrateError>;
