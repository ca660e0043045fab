//! spacegraph-core: Shared vocabulary for the spacegraph migration tooling.
//!
//! This crate provides the foundational types used across all spacegraph crates:
//! - Entity kinds, relationship types, and node keys of the ownership graph
//! - The closed property-value type written to the store
//! - Canonical tenant/space identifier derivation (pure, no store access)
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod ids;
pub mod types;
pub mod value;

pub use error::SpacegraphError;
pub use ids::{CanonicalIds, DeriveError, IdentifierScheme, LegacyIdentity};
pub use types::{
    EntityKind, Invariant, LinkKind, NodeKey, OrphanSpace, RelType, RunId, Scope, ScopeKind,
    SpaceType,
};
pub use value::PropertyValue;
