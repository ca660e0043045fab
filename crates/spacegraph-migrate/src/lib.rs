//! spacegraph-migrate: Ownership-graph migrations for the spacegraph store.
//!
//! Applies schema, backfills canonical tenant/space fields, links scalar
//! foreign keys into provenance-tagged edges, audits the graph invariants,
//! and rolls back a single run on operator request.

pub mod audit;
pub mod backfill;
pub mod config;
pub mod error;
pub mod journal;
pub mod linker;
pub mod report;
pub mod rollback;
pub mod runner;
pub mod schema;
pub mod step;

pub use error::{MigrateError, Result};
pub use report::{MigrationReport, RunState};
pub use runner::MigrationRunner;
