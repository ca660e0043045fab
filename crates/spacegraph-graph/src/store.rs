//! The graph-query interface migration steps are written against.
//!
//! Every operation takes its own parameter struct; there are no
//! string-keyed parameter maps. Write operations are guarded: each one
//! re-checks at write time that the target is still missing and reports
//! whether it changed anything.

use chrono::{DateTime, Utc};
use spacegraph_core::{
    EntityKind, Invariant, LinkKind, NodeKey, OrphanSpace, PropertyValue, RelType, RunId, Scope,
    ScopeKind,
};

use crate::client::GraphError;

// ── Paging ───────────────────────────────────────────────────────

/// Keyset page: rows whose cursor sorts strictly after `after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub after: String,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            after: String::new(),
            limit: limit.max(1),
        }
    }

    pub fn next(&self, cursor: impl Into<String>) -> Self {
        Self {
            after: cursor.into(),
            limit: self.limit,
        }
    }
}

// ── Schema ───────────────────────────────────────────────────────

/// One idempotent constraint or index declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatement {
    pub name: &'static str,
    pub cypher: &'static str,
}

// ── Provenance ───────────────────────────────────────────────────

/// Tags stamped on every edge and node a migration run creates.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub run_id: RunId,
    pub step: &'static str,
    pub at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(run_id: &RunId, step: &'static str) -> Self {
        Self {
            run_id: run_id.clone(),
            step,
            at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> String {
        self.at.to_rfc3339()
    }

    /// The tag properties as stored.
    pub fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![
            ("created_at", self.timestamp().into()),
            ("migrated", true.into()),
            ("migration_run", self.run_id.as_str().into()),
            ("migration_step", self.step.into()),
        ]
    }
}

/// Tags stamped on nodes whose canonical fields a backfill filled.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStamp {
    pub run_id: RunId,
    pub at: DateTime<Utc>,
}

impl FieldStamp {
    pub fn new(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.clone(),
            at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> String {
        self.at.to_rfc3339()
    }
}

// ── Read rows ────────────────────────────────────────────────────

/// A User without a canonical personal space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSeed {
    pub id: String,
    pub legacy_tenant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationSeed {
    pub id: String,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
}

/// A User whose `personal_space_id` names a Space that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalSpaceSeed {
    pub user_id: String,
    pub space_id: String,
    pub tenant_id: Option<String>,
}

/// A scoped entity with at least one missing scope field, plus the scopes
/// it could inherit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSeed {
    pub key: NodeKey,
    pub tenant_id: Option<String>,
    pub space_id: Option<String>,
    pub space_type: Option<String>,
    /// Scope of the explicitly referenced parent (declared Space, Notebook, or Document).
    pub declared: Option<Scope>,
    /// Scope reachable through the owner (owner User's personal scope, or a Space's owner tenant).
    pub owner: Option<Scope>,
}

/// A (source, target) pair implied by a scalar foreign key with no edge yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub source: NodeKey,
    pub target: NodeKey,
    pub role: Option<String>,
    pub cursor: String,
}

// ── Write parameters ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UserBackfill {
    pub user_id: String,
    pub tenant_id: String,
    pub space_id: String,
    pub stamp: FieldStamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationBackfill {
    pub organization_id: String,
    pub tenant_id: String,
    pub stamp: FieldStamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeBackfill {
    pub key: NodeKey,
    pub scope: Scope,
    pub stamp: FieldStamp,
}

/// Ask whether a personal space id is already taken by someone other than `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceClaim {
    pub space_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonalSpaceCreate {
    pub user_id: String,
    pub space_id: String,
    pub tenant_id: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSpaceCreate {
    pub organization_id: String,
    pub space_id: String,
    pub tenant_id: String,
    pub name: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkParams {
    pub source: NodeKey,
    pub target: NodeKey,
    pub role: Option<String>,
    pub provenance: Provenance,
}

/// Outcome of removing the Spaces a run created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeRemoval {
    pub removed: u64,
    /// Created by the run but still referenced, so left in place.
    pub retained: u64,
}

// ── Traits ───────────────────────────────────────────────────────

/// Read-only graph operations.
#[allow(async_fn_in_trait)]
pub trait GraphReader {
    async fn verify_connectivity(&self) -> Result<(), GraphError>;

    async fn users_missing_personal_space(&self, page: &Page)
        -> Result<Vec<UserSeed>, GraphError>;

    async fn personal_space_claimed(&self, claim: &SpaceClaim) -> Result<bool, GraphError>;

    async fn organizations_missing_tenant(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError>;

    async fn personal_spaces_missing(
        &self,
        page: &Page,
    ) -> Result<Vec<PersonalSpaceSeed>, GraphError>;

    async fn scopes_missing(
        &self,
        kind: ScopeKind,
        page: &Page,
    ) -> Result<Vec<ScopeSeed>, GraphError>;

    async fn link_candidates(
        &self,
        kind: LinkKind,
        page: &Page,
    ) -> Result<Vec<LinkCandidate>, GraphError>;

    async fn organizations_without_space(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError>;

    async fn orphan_spaces(&self) -> Result<Vec<OrphanSpace>, GraphError>;

    async fn count_violations(&self, invariant: Invariant) -> Result<u64, GraphError>;

    /// Edges, nodes, and backfilled records carrying a run's provenance.
    async fn count_run_artifacts(&self, run_id: &RunId) -> Result<u64, GraphError>;
}

/// Guarded graph mutations. Each returns whether anything changed.
#[allow(async_fn_in_trait)]
pub trait GraphWriter {
    async fn apply_schema(&self, statement: &SchemaStatement) -> Result<(), GraphError>;

    async fn backfill_user(&self, params: &UserBackfill) -> Result<bool, GraphError>;

    async fn backfill_organization(
        &self,
        params: &OrganizationBackfill,
    ) -> Result<bool, GraphError>;

    async fn create_personal_space(
        &self,
        params: &PersonalSpaceCreate,
    ) -> Result<bool, GraphError>;

    async fn backfill_scope(
        &self,
        kind: ScopeKind,
        params: &ScopeBackfill,
    ) -> Result<bool, GraphError>;

    async fn link(&self, kind: LinkKind, params: &LinkParams) -> Result<bool, GraphError>;

    async fn create_default_space(&self, params: &DefaultSpaceCreate)
        -> Result<bool, GraphError>;

    async fn remove_run_relationships(
        &self,
        rel: RelType,
        run_id: &RunId,
    ) -> Result<u64, GraphError>;

    async fn revert_run_fields(&self, kind: EntityKind, run_id: &RunId)
        -> Result<u64, GraphError>;

    async fn remove_run_spaces(&self, run_id: &RunId) -> Result<NodeRemoval, GraphError>;
}

/// A store migrations can run against.
pub trait GraphStore: GraphReader + GraphWriter {}

impl<T: GraphReader + GraphWriter> GraphStore for T {}
