//! spacegraph-graph: the graph-query interface consumed by migrations.
//!
//! Migration logic depends only on the [`GraphReader`] and [`GraphWriter`]
//! traits. Each operation takes its own strongly-typed parameter struct.
//! Two implementations ship here: [`GraphClient`] speaks Cypher over Bolt,
//! and `MemoryGraph` (feature `memory`) holds the graph in process with
//! identical semantics.

pub mod client;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryGraph;
pub use store::{GraphReader, GraphStore, GraphWriter};
