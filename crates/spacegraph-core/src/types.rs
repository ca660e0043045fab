//! Core domain types for the multi-tenant ownership graph.
//!
//! These describe the node labels, relationship types, and identities the
//! migration subsystem reads and writes. Application traffic owns the
//! entities themselves; spacegraph only fills gaps and links them.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::SpacegraphError;

// ── Entities ──────────────────────────────────────────────────────

/// A node label in the ownership graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Organization,
    Team,
    Space,
    Notebook,
    Document,
    Chunk,
}

impl EntityKind {
    /// Entity types in backfill dependency order.
    pub const BACKFILL_ORDER: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Organization,
        EntityKind::Space,
        EntityKind::Notebook,
        EntityKind::Document,
        EntityKind::Chunk,
    ];

    /// The store label for this entity.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Organization => "Organization",
            Self::Team => "Team",
            Self::Space => "Space",
            Self::Notebook => "Notebook",
            Self::Document => "Document",
            Self::Chunk => "Chunk",
        }
    }

    /// Canonical fields a backfill may fill on this entity.
    pub fn canonical_fields(&self) -> &'static [&'static str] {
        match self {
            Self::User => &["personal_tenant_id", "personal_space_id"],
            Self::Organization | Self::Space => &["tenant_id"],
            Self::Notebook | Self::Document | Self::Chunk => {
                &["tenant_id", "space_id", "space_type"]
            }
            Self::Team => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityKind {
    type Err = SpacegraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(Self::User),
            "organization" | "organizations" => Ok(Self::Organization),
            "team" | "teams" => Ok(Self::Team),
            "space" | "spaces" => Ok(Self::Space),
            "notebook" | "notebooks" => Ok(Self::Notebook),
            "document" | "documents" => Ok(Self::Document),
            "chunk" | "chunks" => Ok(Self::Chunk),
            _ => Err(SpacegraphError::UnknownEntity(s.to_string())),
        }
    }
}

/// Identity of a node: `id` for every label except Chunk, which is keyed by
/// the pair (file identifier, chunk identifier).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum NodeKey {
    Id(String),
    Chunk { file_id: String, chunk_id: String },
}

impl NodeKey {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn chunk(file_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self::Chunk {
            file_id: file_id.into(),
            chunk_id: chunk_id.into(),
        }
    }

    /// Sortable string form used for keyset pagination.
    pub fn cursor(&self) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::Chunk { file_id, chunk_id } => format!("{file_id}::{chunk_id}"),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cursor())
    }
}

// ── Spaces and scopes ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SpaceType {
    Personal,
    Organization,
}

impl SpaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Organization => "organization",
        }
    }

    /// Parse a stored value; unknown or empty strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "personal" => Some(Self::Personal),
            "organization" => Some(Self::Organization),
            _ => None,
        }
    }

    /// The `owner_type` stamped on spaces of this type.
    pub fn owner_type(&self) -> &'static str {
        match self {
            Self::Personal => "user",
            Self::Organization => "organization",
        }
    }
}

/// A fully resolved tenancy scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: String,
    pub space_id: String,
    pub space_type: SpaceType,
}

impl Scope {
    /// Build a scope from stored strings, treating empty values as missing.
    pub fn from_parts(tenant_id: &str, space_id: &str, space_type: &str) -> Option<Self> {
        if tenant_id.is_empty() || space_id.is_empty() {
            return None;
        }
        Some(Self {
            tenant_id: tenant_id.to_string(),
            space_id: space_id.to_string(),
            space_type: SpaceType::parse(space_type)?,
        })
    }
}

/// Entities whose tenancy scope is inherited from a parent during backfill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Space,
    Notebook,
    Document,
    Chunk,
}

impl ScopeKind {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Space => EntityKind::Space,
            Self::Notebook => EntityKind::Notebook,
            Self::Document => EntityKind::Document,
            Self::Chunk => EntityKind::Chunk,
        }
    }
}

// ── Relationships ─────────────────────────────────────────────────

/// The type of relationship between two nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    Owns,
    HasSpace,
    BelongsTo,
    MemberOf,
    Contains,
}

impl RelType {
    pub const ALL: [RelType; 5] = [
        RelType::Owns,
        RelType::HasSpace,
        RelType::BelongsTo,
        RelType::MemberOf,
        RelType::Contains,
    ];

    /// The Cypher relationship type string.
    pub fn cypher(&self) -> &'static str {
        match self {
            Self::Owns => "OWNS",
            Self::HasSpace => "HAS_SPACE",
            Self::BelongsTo => "BELONGS_TO",
            Self::MemberOf => "MEMBER_OF",
            Self::Contains => "CONTAINS",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cypher())
    }
}

/// A scalar foreign key the linker turns into an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// `User.personal_space_id` → personal Space.
    Owns,
    /// `Space.owner_id` → owning Organization.
    HasSpace,
    /// `Notebook.space_id` → Space.
    BelongsTo,
    /// `User.organization_id` → Organization, carrying a role.
    OrganizationMembership,
    /// `Team.member_ids` → member Users.
    TeamMembership,
    /// `Document.notebook_id` → Notebook.
    NotebookContains,
    /// `Chunk.file_id` → Document.
    DocumentContains,
}

impl LinkKind {
    /// Link kinds in linker order (default spaces run between `HasSpace` and `BelongsTo`).
    pub const ALL: [LinkKind; 7] = [
        LinkKind::Owns,
        LinkKind::HasSpace,
        LinkKind::BelongsTo,
        LinkKind::OrganizationMembership,
        LinkKind::TeamMembership,
        LinkKind::NotebookContains,
        LinkKind::DocumentContains,
    ];

    pub fn rel(&self) -> RelType {
        match self {
            Self::Owns => RelType::Owns,
            Self::HasSpace => RelType::HasSpace,
            Self::BelongsTo => RelType::BelongsTo,
            Self::OrganizationMembership | Self::TeamMembership => RelType::MemberOf,
            Self::NotebookContains | Self::DocumentContains => RelType::Contains,
        }
    }

    pub fn source(&self) -> EntityKind {
        match self {
            Self::Owns | Self::OrganizationMembership | Self::TeamMembership => EntityKind::User,
            Self::HasSpace => EntityKind::Organization,
            Self::BelongsTo | Self::NotebookContains => EntityKind::Notebook,
            Self::DocumentContains => EntityKind::Document,
        }
    }

    pub fn target(&self) -> EntityKind {
        match self {
            Self::Owns | Self::HasSpace | Self::BelongsTo => EntityKind::Space,
            Self::OrganizationMembership => EntityKind::Organization,
            Self::TeamMembership => EntityKind::Team,
            Self::NotebookContains => EntityKind::Document,
            Self::DocumentContains => EntityKind::Chunk,
        }
    }

    /// Step name stamped as `migration_step` on created edges.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Owns => "link_owns",
            Self::HasSpace => "link_has_space",
            Self::BelongsTo => "link_belongs_to",
            Self::OrganizationMembership => "link_organization_members",
            Self::TeamMembership => "link_team_members",
            Self::NotebookContains => "link_notebook_documents",
            Self::DocumentContains => "link_document_chunks",
        }
    }
}

// ── Verification ──────────────────────────────────────────────────

/// A structural invariant checked by the integrity auditor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    PersonalSpacesWithoutSingleOwner,
    UsersWithoutOwnsRelationship,
    UsersOwningForeignSpaces,
    OrgSpacesWithoutSingleHasSpace,
    OrphanedOrgSpaces,
    OrganizationsWithoutSpace,
    OrphanedNotebooks,
    NotebooksWithoutBelongsTo,
    OrphanedDocuments,
    DocumentsScopeMismatch,
    DuplicateChunks,
    DuplicateRelationships,
}

impl Invariant {
    pub const ALL: [Invariant; 12] = [
        Invariant::PersonalSpacesWithoutSingleOwner,
        Invariant::UsersWithoutOwnsRelationship,
        Invariant::UsersOwningForeignSpaces,
        Invariant::OrgSpacesWithoutSingleHasSpace,
        Invariant::OrphanedOrgSpaces,
        Invariant::OrganizationsWithoutSpace,
        Invariant::OrphanedNotebooks,
        Invariant::NotebooksWithoutBelongsTo,
        Invariant::OrphanedDocuments,
        Invariant::DocumentsScopeMismatch,
        Invariant::DuplicateChunks,
        Invariant::DuplicateRelationships,
    ];

    /// Machine-parseable count column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::PersonalSpacesWithoutSingleOwner => "personal_spaces_without_single_owner",
            Self::UsersWithoutOwnsRelationship => "users_without_owns_relationship",
            Self::UsersOwningForeignSpaces => "users_owning_foreign_spaces",
            Self::OrgSpacesWithoutSingleHasSpace => "org_spaces_without_single_has_space",
            Self::OrphanedOrgSpaces => "orphaned_org_spaces",
            Self::OrganizationsWithoutSpace => "organizations_without_space",
            Self::OrphanedNotebooks => "orphaned_notebooks",
            Self::NotebooksWithoutBelongsTo => "notebooks_without_belongs_to",
            Self::OrphanedDocuments => "orphaned_documents",
            Self::DocumentsScopeMismatch => "documents_scope_mismatch",
            Self::DuplicateChunks => "duplicate_chunks",
            Self::DuplicateRelationships => "duplicate_relationships",
        }
    }
}

/// An organization-type Space whose claimed owner does not exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanSpace {
    pub space_id: String,
    pub claimed_owner_id: String,
}

// ── Runs ──────────────────────────────────────────────────────────

/// Provenance identifier stamped on everything a migration run creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Validate an operator-supplied run identifier.
    pub fn parse(raw: &str) -> Result<Self, SpacegraphError> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(SpacegraphError::InvalidRunId(raw.to_string()))
        }
    }

    /// A fresh identifier derived from the current UTC time.
    pub fn generate() -> Self {
        Self(format!("mig-{}", Utc::now().format("%Y%m%d%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&RelType::HasSpace).unwrap();
        assert_eq!(json, "\"HAS_SPACE\"");
        assert_eq!(RelType::BelongsTo.cypher(), "BELONGS_TO");
    }

    #[test]
    fn entity_kind_parses_plural_names() {
        assert_eq!("Users".parse::<EntityKind>().unwrap(), EntityKind::User);
        assert_eq!("chunks".parse::<EntityKind>().unwrap(), EntityKind::Chunk);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn chunk_cursor_combines_both_identifiers() {
        let key = NodeKey::chunk("doc-1", "7");
        assert_eq!(key.cursor(), "doc-1::7");
        assert!(NodeKey::id("a") < NodeKey::id("b"));
    }

    #[test]
    fn run_id_rejects_injection_characters() {
        assert!(RunId::parse("mig-20261017_1").is_ok());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("x' OR 1=1").is_err());
        assert!(RunId::generate().as_str().starts_with("mig-"));
    }

    #[test]
    fn scope_requires_all_parts() {
        assert!(Scope::from_parts("tenant_1", "space_1", "personal").is_some());
        assert!(Scope::from_parts("", "space_1", "personal").is_none());
        assert!(Scope::from_parts("tenant_1", "space_1", "shared").is_none());
    }

    #[test]
    fn link_kinds_map_to_relationships() {
        assert_eq!(LinkKind::TeamMembership.rel(), RelType::MemberOf);
        assert_eq!(LinkKind::DocumentContains.target(), EntityKind::Chunk);
        assert_eq!(LinkKind::HasSpace.source(), EntityKind::Organization);
    }
}
