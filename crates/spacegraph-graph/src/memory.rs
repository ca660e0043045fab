//! In-memory graph store.
//!
//! Mirrors the guarded semantics of the Neo4j statements in `queries` and
//! `mutations` over a plain node/edge list, so migration steps can be driven
//! end to end without a database. Faults (offline store, rejected records,
//! slow records, rejected schema statements) can be injected per test.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use spacegraph_core::{
    EntityKind, Invariant, LinkKind, NodeKey, OrphanSpace, PropertyValue, RelType, RunId, Scope,
    ScopeKind, SpacegraphError,
};
use tokio::sync::RwLock;

use crate::client::GraphError;
use crate::store::{
    DefaultSpaceCreate, FieldStamp, GraphReader, GraphWriter, LinkCandidate, LinkParams,
    NodeRemoval, OrganizationBackfill, OrganizationSeed, Page, PersonalSpaceCreate,
    PersonalSpaceSeed, Provenance, SchemaStatement, ScopeBackfill, ScopeSeed, SpaceClaim,
    UserBackfill, UserSeed,
};

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub kind: EntityKind,
    pub props: Properties,
}

impl StoredNode {
    /// A non-empty string property.
    fn text(&self, name: &str) -> Option<&str> {
        match self.props.get(name) {
            Some(PropertyValue::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Absent, or the empty string.
    fn missing(&self, name: &str) -> bool {
        match self.props.get(name) {
            None => true,
            Some(PropertyValue::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }

    fn chunk_id(&self) -> Option<String> {
        self.props.get("chunk_id").and_then(PropertyValue::key_string)
    }

    fn key(&self) -> NodeKey {
        match self.kind {
            EntityKind::Chunk => NodeKey::chunk(
                self.text("file_id").unwrap_or_default(),
                self.chunk_id().unwrap_or_default(),
            ),
            _ => NodeKey::id(self.text("id").unwrap_or_default()),
        }
    }

    fn matches(&self, kind: EntityKind, key: &NodeKey) -> bool {
        if self.kind != kind {
            return false;
        }
        match key {
            NodeKey::Id(id) => self.text("id") == Some(id.as_str()),
            NodeKey::Chunk { file_id, chunk_id } => {
                self.text("file_id") == Some(file_id.as_str())
                    && self.chunk_id().as_deref() == Some(chunk_id.as_str())
            }
        }
    }

    fn created_by(&self, run_id: &RunId) -> bool {
        tagged(&self.props, run_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub rel: RelType,
    pub source: usize,
    pub target: usize,
    pub props: Properties,
}

/// A relationship as seen from outside the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub source: NodeKey,
    pub target: NodeKey,
    pub props: Properties,
}

/// Complete store contents. Comparing two snapshots detects any mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    nodes: Vec<Option<StoredNode>>,
    edges: Vec<StoredEdge>,
    schema: BTreeSet<String>,
}

impl GraphSnapshot {
    fn live(&self, kind: EntityKind) -> impl Iterator<Item = (usize, &StoredNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(move |(i, n)| n.as_ref().filter(|n| n.kind == kind).map(|n| (i, n)))
    }

    fn node(&self, index: usize) -> Option<&StoredNode> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    fn find(&self, kind: EntityKind, key: &NodeKey) -> Vec<usize> {
        self.live(kind)
            .filter(|(_, n)| n.matches(kind, key))
            .map(|(i, _)| i)
            .collect()
    }

    fn find_id(&self, kind: EntityKind, id: &str) -> Vec<usize> {
        self.find(kind, &NodeKey::id(id))
    }

    fn by_id(&self, kind: EntityKind, id: &str) -> Option<&StoredNode> {
        self.find_id(kind, id).first().and_then(|&i| self.node(i))
    }

    fn key(&self, index: usize) -> NodeKey {
        self.node(index)
            .map(StoredNode::key)
            .unwrap_or_else(|| NodeKey::id(""))
    }

    fn has_edge(&self, rel: RelType, source: usize, target: usize) -> bool {
        self.edges
            .iter()
            .any(|e| e.rel == rel && e.source == source && e.target == target)
    }

    fn touches(&self, index: usize) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == index || e.target == index)
    }

    /// Sources of `rel` edges into `target`, restricted to nodes of `kind`.
    fn incoming(&self, rel: RelType, target: usize, kind: EntityKind) -> Vec<&StoredNode> {
        self.edges
            .iter()
            .filter(|e| e.rel == rel && e.target == target)
            .filter_map(|e| self.node(e.source))
            .filter(|n| n.kind == kind)
            .collect()
    }

    fn outgoing(&self, rel: RelType, source: usize, kind: EntityKind) -> Vec<&StoredNode> {
        self.edges
            .iter()
            .filter(|e| e.rel == rel && e.source == source)
            .filter_map(|e| self.node(e.target))
            .filter(|n| n.kind == kind)
            .collect()
    }

    fn push_node(&mut self, kind: EntityKind, props: Properties) -> usize {
        self.nodes.push(Some(StoredNode { kind, props }));
        self.nodes.len() - 1
    }
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    failing_schema: HashSet<String>,
    failing_records: HashSet<String>,
    delays: HashMap<String, Duration>,
}

/// In-memory [`GraphReader`] + [`GraphWriter`].
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphSnapshot>,
    faults: RwLock<Faults>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ──────────────────────────────────────────────────

    pub async fn insert_node<I, K, V>(&self, kind: EntityKind, props: I) -> NodeKey
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let props: Properties = props
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut g = self.state.write().await;
        let index = g.push_node(kind, props);
        g.key(index)
    }

    /// Insert a node from a JSON object. `null` fields are treated as absent;
    /// anything that is not a storable value is rejected.
    pub async fn insert_json(
        &self,
        kind: EntityKind,
        value: serde_json::Value,
    ) -> Result<NodeKey, SpacegraphError> {
        let serde_json::Value::Object(fields) = value else {
            return Err(SpacegraphError::InvalidProperty {
                path: "$".to_string(),
                reason: "a node must be a JSON object".to_string(),
            });
        };

        let mut props = Properties::new();
        for (name, field) in fields {
            if field.is_null() {
                continue;
            }
            let value = PropertyValue::try_from(field).map_err(|e| match e {
                SpacegraphError::InvalidProperty { path, reason } => {
                    SpacegraphError::InvalidProperty {
                        path: path.replacen('$', &format!("$.{name}"), 1),
                        reason,
                    }
                }
                other => other,
            })?;
            props.insert(name, value);
        }

        let mut g = self.state.write().await;
        let index = g.push_node(kind, props);
        Ok(g.key(index))
    }

    /// Connect the first nodes matching each key. Returns false when either
    /// endpoint does not exist.
    pub async fn insert_edge<I, K, V>(
        &self,
        rel: RelType,
        source: (EntityKind, &NodeKey),
        target: (EntityKind, &NodeKey),
        props: I,
    ) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let mut g = self.state.write().await;
        let (Some(&s), Some(&t)) = (
            g.find(source.0, source.1).first(),
            g.find(target.0, target.1).first(),
        ) else {
            return false;
        };
        let props = props
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        g.edges.push(StoredEdge {
            rel,
            source: s,
            target: t,
            props,
        });
        true
    }

    // ── Inspection ───────────────────────────────────────────────

    pub async fn node(&self, kind: EntityKind, key: &NodeKey) -> Option<Properties> {
        let g = self.state.read().await;
        let index = *g.find(kind, key).first()?;
        g.node(index).map(|n| n.props.clone())
    }

    pub async fn property(&self, kind: EntityKind, id: &str, name: &str) -> Option<PropertyValue> {
        self.node(kind, &NodeKey::id(id))
            .await
            .and_then(|mut props| props.remove(name))
    }

    pub async fn nodes(&self, kind: EntityKind) -> Vec<Properties> {
        let g = self.state.read().await;
        g.live(kind).map(|(_, n)| n.props.clone()).collect()
    }

    pub async fn edges(&self, rel: RelType) -> Vec<EdgeView> {
        let g = self.state.read().await;
        g.edges
            .iter()
            .filter(|e| e.rel == rel)
            .map(|e| EdgeView {
                source: g.key(e.source),
                target: g.key(e.target),
                props: e.props.clone(),
            })
            .collect()
    }

    pub async fn edge_count(&self, rel: RelType, source: &NodeKey, target: &NodeKey) -> usize {
        self.edges(rel)
            .await
            .iter()
            .filter(|e| &e.source == source && &e.target == target)
            .count()
    }

    pub async fn applied_schema(&self) -> Vec<String> {
        self.state.read().await.schema.iter().cloned().collect()
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.state.read().await.clone()
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Every operation fails with a connection error while offline.
    pub async fn set_offline(&self, offline: bool) {
        self.faults.write().await.offline = offline;
    }

    pub async fn fail_schema(&self, name: impl Into<String>) {
        self.faults.write().await.failing_schema.insert(name.into());
    }

    /// Writes touching this record key (id, or `file::chunk`) are rejected.
    pub async fn fail_record(&self, key: impl Into<String>) {
        self.faults.write().await.failing_records.insert(key.into());
    }

    /// Writes touching this record key stall before executing.
    pub async fn delay_record(&self, key: impl Into<String>, delay: Duration) {
        self.faults.write().await.delays.insert(key.into(), delay);
    }

    async fn guard(&self, records: &[String]) -> Result<(), GraphError> {
        let (offline, delay, rejected) = {
            let f = self.faults.read().await;
            (
                f.offline,
                records.iter().filter_map(|r| f.delays.get(r)).max().copied(),
                records.iter().find(|r| f.failing_records.contains(*r)).cloned(),
            )
        };
        if offline {
            return Err(GraphError::Connection("memory graph is offline".to_string()));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match rejected {
            Some(record) => Err(GraphError::Rejected(format!("write to {record} rejected"))),
            None => Ok(()),
        }
    }
}

// ── Reads ────────────────────────────────────────────────────────

impl GraphReader for MemoryGraph {
    async fn verify_connectivity(&self) -> Result<(), GraphError> {
        self.guard(&[]).await
    }

    async fn users_missing_personal_space(
        &self,
        page: &Page,
    ) -> Result<Vec<UserSeed>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let rows = g
            .live(EntityKind::User)
            .filter(|(_, u)| u.missing("personal_space_id"))
            .filter_map(|(_, u)| {
                let id = u.text("id")?;
                Some((
                    id.to_string(),
                    UserSeed {
                        id: id.to_string(),
                        legacy_tenant_id: owned(u.text("personal_tenant_id")),
                    },
                ))
            })
            .collect();
        Ok(paged(rows, page))
    }

    async fn personal_space_claimed(&self, claim: &SpaceClaim) -> Result<bool, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let other_users = g.live(EntityKind::User).any(|(_, u)| {
            u.text("personal_space_id") == Some(claim.space_id.as_str())
                && u.text("id") != Some(claim.user_id.as_str())
        });
        let foreign_space = g.live(EntityKind::Space).any(|(_, s)| {
            s.text("id") == Some(claim.space_id.as_str())
                && (s.text("space_type") != Some("personal")
                    || s.text("owner_id").is_some_and(|o| o != claim.user_id))
        });
        Ok(other_users || foreign_space)
    }

    async fn organizations_missing_tenant(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let rows = g
            .live(EntityKind::Organization)
            .filter(|(_, o)| o.missing("tenant_id"))
            .filter_map(|(_, o)| organization_row(o))
            .collect();
        Ok(paged(rows, page))
    }

    async fn personal_spaces_missing(
        &self,
        page: &Page,
    ) -> Result<Vec<PersonalSpaceSeed>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let rows = g
            .live(EntityKind::User)
            .filter_map(|(_, u)| {
                let id = u.text("id")?;
                let space_id = u.text("personal_space_id")?;
                if !g.find_id(EntityKind::Space, space_id).is_empty() {
                    return None;
                }
                Some((
                    id.to_string(),
                    PersonalSpaceSeed {
                        user_id: id.to_string(),
                        space_id: space_id.to_string(),
                        tenant_id: owned(u.text("personal_tenant_id")),
                    },
                ))
            })
            .collect();
        Ok(paged(rows, page))
    }

    async fn scopes_missing(
        &self,
        kind: ScopeKind,
        page: &Page,
    ) -> Result<Vec<ScopeSeed>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let entity = kind.entity();

        let mut rows = Vec::new();
        for (_, node) in g.live(entity) {
            if !entity.canonical_fields().iter().any(|f| node.missing(f)) {
                continue;
            }
            if kind != ScopeKind::Chunk && node.text("id").is_none() {
                continue;
            }

            let (declared, owner) = match kind {
                ScopeKind::Space => {
                    let owner_id = node.text("owner_id").unwrap_or_default();
                    let owner_tenant = match node.text("space_type") {
                        Some("personal") => g
                            .by_id(EntityKind::User, owner_id)
                            .and_then(|u| u.text("personal_tenant_id")),
                        Some("organization") => g
                            .by_id(EntityKind::Organization, owner_id)
                            .and_then(|o| o.text("tenant_id")),
                        _ => None,
                    };
                    (
                        None,
                        scope_of(owner_tenant, node.text("id"), node.text("space_type")),
                    )
                }
                ScopeKind::Notebook => {
                    let declared = node
                        .text("space_id")
                        .and_then(|id| g.by_id(EntityKind::Space, id))
                        .and_then(|s| {
                            scope_of(s.text("tenant_id"), s.text("id"), s.text("space_type"))
                        });
                    let owner = node
                        .text("owner_id")
                        .and_then(|id| g.by_id(EntityKind::User, id))
                        .and_then(|u| {
                            scope_of(
                                u.text("personal_tenant_id"),
                                u.text("personal_space_id"),
                                Some("personal"),
                            )
                        });
                    (declared, owner)
                }
                ScopeKind::Document => (
                    inherited(&g, EntityKind::Notebook, node.text("notebook_id")),
                    None,
                ),
                ScopeKind::Chunk => (
                    inherited(&g, EntityKind::Document, node.text("file_id")),
                    None,
                ),
            };

            let key = node.key();
            let space_id = match kind {
                ScopeKind::Space => node.text("id"),
                _ => node.text("space_id"),
            };
            rows.push((
                key.cursor(),
                ScopeSeed {
                    key,
                    tenant_id: match kind {
                        ScopeKind::Space => None,
                        _ => owned(node.text("tenant_id")),
                    },
                    space_id: owned(space_id),
                    space_type: owned(node.text("space_type")),
                    declared,
                    owner,
                },
            ));
        }
        Ok(paged(rows, page))
    }

    async fn link_candidates(
        &self,
        kind: LinkKind,
        page: &Page,
    ) -> Result<Vec<LinkCandidate>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let rows = match kind {
            LinkKind::Owns => foreign_key_links(&g, kind, "personal_space_id"),
            LinkKind::HasSpace => foreign_key_links(&g, kind, "owner_id"),
            LinkKind::BelongsTo => foreign_key_links(&g, kind, "space_id"),
            LinkKind::OrganizationMembership => foreign_key_links(&g, kind, "organization_id"),
            LinkKind::NotebookContains => foreign_key_links(&g, kind, "notebook_id"),
            LinkKind::DocumentContains => foreign_key_links(&g, kind, "file_id"),
            LinkKind::TeamMembership => team_member_links(&g),
        };
        Ok(paged(rows, page))
    }

    async fn organizations_without_space(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let rows = g
            .live(EntityKind::Organization)
            .filter(|(i, _)| {
                g.outgoing(RelType::HasSpace, *i, EntityKind::Space)
                    .is_empty()
            })
            .filter_map(|(_, o)| organization_row(o))
            .collect();
        Ok(paged(rows, page))
    }

    async fn orphan_spaces(&self) -> Result<Vec<OrphanSpace>, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let mut orphans: Vec<OrphanSpace> = g
            .live(EntityKind::Space)
            .filter(|(_, s)| is_orphan_org_space(&g, s))
            .filter_map(|(_, s)| {
                Some(OrphanSpace {
                    space_id: s.text("id")?.to_string(),
                    claimed_owner_id: s.text("owner_id").unwrap_or_default().to_string(),
                })
            })
            .collect();
        orphans.sort_by(|a, b| a.space_id.cmp(&b.space_id));
        Ok(orphans)
    }

    async fn count_violations(&self, invariant: Invariant) -> Result<u64, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        Ok(violations(&g, invariant) as u64)
    }

    async fn count_run_artifacts(&self, run_id: &RunId) -> Result<u64, GraphError> {
        self.guard(&[]).await?;
        let g = self.state.read().await;
        let edges = g.edges.iter().filter(|e| has_run(&e.props, run_id)).count();
        let nodes = g
            .nodes
            .iter()
            .flatten()
            .filter(|n| {
                has_run(&n.props, run_id)
                    || n.props.get("backfill_run").and_then(PropertyValue::as_str)
                        == Some(run_id.as_str())
            })
            .count();
        Ok((edges + nodes) as u64)
    }
}

// ── Writes ───────────────────────────────────────────────────────

impl GraphWriter for MemoryGraph {
    async fn apply_schema(&self, statement: &SchemaStatement) -> Result<(), GraphError> {
        self.guard(&[]).await?;
        if self
            .faults
            .read()
            .await
            .failing_schema
            .contains(statement.name)
        {
            return Err(GraphError::Rejected(format!(
                "schema statement {} rejected",
                statement.name
            )));
        }
        self.state
            .write()
            .await
            .schema
            .insert(statement.name.to_string());
        Ok(())
    }

    async fn backfill_user(&self, params: &UserBackfill) -> Result<bool, GraphError> {
        self.guard(&[params.user_id.clone()]).await?;
        let values = [
            ("personal_tenant_id", params.tenant_id.as_str()),
            ("personal_space_id", params.space_id.as_str()),
        ];
        let mut g = self.state.write().await;
        Ok(fill_matching(
            &mut g,
            EntityKind::User,
            &NodeKey::id(params.user_id.as_str()),
            &values,
            &params.stamp,
        ))
    }

    async fn backfill_organization(
        &self,
        params: &OrganizationBackfill,
    ) -> Result<bool, GraphError> {
        self.guard(&[params.organization_id.clone()]).await?;
        let values = [("tenant_id", params.tenant_id.as_str())];
        let mut g = self.state.write().await;
        Ok(fill_matching(
            &mut g,
            EntityKind::Organization,
            &NodeKey::id(params.organization_id.as_str()),
            &values,
            &params.stamp,
        ))
    }

    async fn create_personal_space(
        &self,
        params: &PersonalSpaceCreate,
    ) -> Result<bool, GraphError> {
        self.guard(&[params.user_id.clone(), params.space_id.clone()])
            .await?;
        let mut g = self.state.write().await;
        if g.find_id(EntityKind::User, &params.user_id).is_empty()
            || !g.find_id(EntityKind::Space, &params.space_id).is_empty()
        {
            return Ok(false);
        }

        let now = params.provenance.timestamp();
        let mut props = provenance_props(&params.provenance);
        for (name, value) in [
            ("id", params.space_id.as_str()),
            ("space_type", "personal"),
            ("owner_id", params.user_id.as_str()),
            ("owner_type", "user"),
            ("status", "active"),
            ("name", "Personal"),
            ("tenant_id", params.tenant_id.as_str()),
            ("updated_at", now.as_str()),
        ] {
            props.insert(name.to_string(), value.into());
        }
        g.push_node(EntityKind::Space, props);
        Ok(true)
    }

    async fn backfill_scope(
        &self,
        kind: ScopeKind,
        params: &ScopeBackfill,
    ) -> Result<bool, GraphError> {
        self.guard(&[params.key.cursor()]).await?;
        let entity = kind.entity();
        let values: Vec<(&str, &str)> = entity
            .canonical_fields()
            .iter()
            .map(|&field| {
                let value = match field {
                    "space_id" => params.scope.space_id.as_str(),
                    "space_type" => params.scope.space_type.as_str(),
                    _ => params.scope.tenant_id.as_str(),
                };
                (field, value)
            })
            .collect();
        let mut g = self.state.write().await;
        Ok(fill_matching(&mut g, entity, &params.key, &values, &params.stamp))
    }

    async fn link(&self, kind: LinkKind, params: &LinkParams) -> Result<bool, GraphError> {
        self.guard(&[params.source.cursor(), params.target.cursor()])
            .await?;
        let rel = kind.rel();
        let mut g = self.state.write().await;
        let sources = g.find(kind.source(), &params.source);
        let targets = g.find(kind.target(), &params.target);

        let mut created = 0;
        for &s in &sources {
            for &t in &targets {
                if g.has_edge(rel, s, t) {
                    continue;
                }
                let mut props = provenance_props(&params.provenance);
                match rel {
                    RelType::HasSpace => {
                        props.insert("is_default".to_string(), false.into());
                    }
                    RelType::MemberOf => {
                        let role = params.role.as_deref().unwrap_or("member");
                        props.insert("role".to_string(), role.into());
                    }
                    _ => {}
                }
                g.edges.push(StoredEdge {
                    rel,
                    source: s,
                    target: t,
                    props,
                });
                created += 1;
            }
        }
        Ok(created > 0)
    }

    async fn create_default_space(
        &self,
        params: &DefaultSpaceCreate,
    ) -> Result<bool, GraphError> {
        self.guard(&[params.organization_id.clone()]).await?;
        let mut g = self.state.write().await;
        let Some(&org) = g
            .find_id(EntityKind::Organization, &params.organization_id)
            .first()
        else {
            return Ok(false);
        };
        if !g.outgoing(RelType::HasSpace, org, EntityKind::Space).is_empty() {
            return Ok(false);
        }

        let space = match g.find_id(EntityKind::Space, &params.space_id).first() {
            Some(&existing) => existing,
            None => {
                let now = params.provenance.timestamp();
                let mut props = provenance_props(&params.provenance);
                for (name, value) in [
                    ("id", params.space_id.as_str()),
                    ("space_type", "organization"),
                    ("owner_id", params.organization_id.as_str()),
                    ("owner_type", "organization"),
                    ("status", "active"),
                    ("name", params.name.as_str()),
                    ("tenant_id", params.tenant_id.as_str()),
                    ("updated_at", now.as_str()),
                ] {
                    props.insert(name.to_string(), value.into());
                }
                g.push_node(EntityKind::Space, props)
            }
        };

        let mut props = provenance_props(&params.provenance);
        props.insert("is_default".to_string(), true.into());
        g.edges.push(StoredEdge {
            rel: RelType::HasSpace,
            source: org,
            target: space,
            props,
        });
        Ok(true)
    }

    async fn remove_run_relationships(
        &self,
        rel: RelType,
        run_id: &RunId,
    ) -> Result<u64, GraphError> {
        self.guard(&[]).await?;
        let mut g = self.state.write().await;
        let before = g.edges.len();
        g.edges.retain(|e| !(e.rel == rel && tagged(&e.props, run_id)));
        Ok((before - g.edges.len()) as u64)
    }

    async fn revert_run_fields(
        &self,
        kind: EntityKind,
        run_id: &RunId,
    ) -> Result<u64, GraphError> {
        self.guard(&[]).await?;
        let fields = kind.canonical_fields();
        if fields.is_empty() {
            return Ok(0);
        }

        let mut g = self.state.write().await;
        let mut reverted = 0;
        for node in g.nodes.iter_mut().flatten() {
            if node.kind != kind
                || node.props.get("backfill_run").and_then(PropertyValue::as_str)
                    != Some(run_id.as_str())
            {
                continue;
            }
            let filled = node
                .props
                .get("backfilled_fields")
                .map(PropertyValue::string_items)
                .unwrap_or_default();
            for field in fields {
                if filled.iter().any(|f| f == field) {
                    node.props.remove(*field);
                }
            }
            node.props.remove("backfill_run");
            node.props.remove("backfilled_fields");
            reverted += 1;
        }
        Ok(reverted)
    }

    async fn remove_run_spaces(&self, run_id: &RunId) -> Result<NodeRemoval, GraphError> {
        self.guard(&[]).await?;
        let mut g = self.state.write().await;
        let created: Vec<(usize, Option<String>)> = g
            .live(EntityKind::Space)
            .filter(|(_, s)| s.created_by(run_id))
            .map(|(i, s)| (i, owned(s.text("id"))))
            .collect();

        let mut removal = NodeRemoval::default();
        for (index, id) in created {
            let referenced = id.as_deref().is_some_and(|id| {
                g.live(EntityKind::Notebook)
                    .any(|(_, n)| n.text("space_id") == Some(id))
            });
            if g.touches(index) || referenced {
                removal.retained += 1;
            } else {
                g.nodes[index] = None;
                removal.removed += 1;
            }
        }
        Ok(removal)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn scope_of(tenant: Option<&str>, space: Option<&str>, space_type: Option<&str>) -> Option<Scope> {
    Scope::from_parts(
        tenant.unwrap_or_default(),
        space.unwrap_or_default(),
        space_type.unwrap_or_default(),
    )
}

/// Scope stored on the parent named by a foreign key.
fn inherited(g: &GraphSnapshot, parent: EntityKind, id: Option<&str>) -> Option<Scope> {
    let node = g.by_id(parent, id?)?;
    scope_of(
        node.text("tenant_id"),
        node.text("space_id"),
        node.text("space_type"),
    )
}

fn organization_row(o: &StoredNode) -> Option<(String, OrganizationSeed)> {
    let id = o.text("id")?;
    Some((
        id.to_string(),
        OrganizationSeed {
            id: id.to_string(),
            tenant_id: owned(o.text("tenant_id")),
            name: owned(o.text("name")),
        },
    ))
}

/// Keyset page over (cursor, row) pairs.
fn paged<T>(mut rows: Vec<(String, T)>, page: &Page) -> Vec<T> {
    rows.retain(|(cursor, _)| cursor.as_str() > page.after.as_str());
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.into_iter()
        .take(page.limit)
        .map(|(_, row)| row)
        .collect()
}

fn has_run(props: &Properties, run_id: &RunId) -> bool {
    props.get("migration_run").and_then(PropertyValue::as_str) == Some(run_id.as_str())
}

fn tagged(props: &Properties, run_id: &RunId) -> bool {
    has_run(props, run_id) && props.get("migrated").and_then(PropertyValue::as_bool) == Some(true)
}

fn provenance_props(provenance: &Provenance) -> Properties {
    provenance
        .properties()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Fill the still-missing fields on every node matching `key`.
fn fill_matching(
    g: &mut GraphSnapshot,
    kind: EntityKind,
    key: &NodeKey,
    values: &[(&str, &str)],
    stamp: &FieldStamp,
) -> bool {
    let mut changed = false;
    for index in g.find(kind, key) {
        let Some(node) = g.nodes[index].as_mut() else {
            continue;
        };
        let filled: Vec<String> = values
            .iter()
            .filter(|(field, _)| node.missing(field))
            .map(|(field, _)| field.to_string())
            .collect();
        if filled.is_empty() {
            continue;
        }
        for (field, value) in values {
            if filled.iter().any(|f| f == field) {
                node.props.insert(field.to_string(), (*value).into());
            }
        }
        node.props
            .insert("updated_at".to_string(), stamp.timestamp().into());
        node.props
            .insert("backfill_run".to_string(), stamp.run_id.as_str().into());
        node.props
            .insert("backfilled_fields".to_string(), filled.into());
        changed = true;
    }
    changed
}

/// Candidates for a link kind backed by a single scalar foreign key.
///
/// The "holder" is the node carrying the key; depending on the kind it is the
/// edge's source (User, Notebook) or its target (Space, Document, Chunk).
fn foreign_key_links(g: &GraphSnapshot, kind: LinkKind, fk: &str) -> Vec<(String, LinkCandidate)> {
    let holder_is_source = matches!(
        kind,
        LinkKind::Owns | LinkKind::BelongsTo | LinkKind::OrganizationMembership
    );
    let (holder_kind, referenced_kind) = if holder_is_source {
        (kind.source(), kind.target())
    } else {
        (kind.target(), kind.source())
    };

    let mut rows = Vec::new();
    for (h, holder) in g.live(holder_kind) {
        let Some(reference) = holder.text(fk) else {
            continue;
        };
        if holder_kind != EntityKind::Chunk && holder.text("id").is_none() {
            continue;
        }
        if kind == LinkKind::HasSpace && holder.text("space_type") != Some("organization") {
            continue;
        }
        let cursor = holder.key().cursor();

        for r in g.find_id(referenced_kind, reference) {
            if kind == LinkKind::Owns {
                let space_type = g.node(r).and_then(|s| s.text("space_type"));
                if !matches!(space_type, None | Some("personal")) {
                    continue;
                }
            }
            let (s, t) = if holder_is_source { (h, r) } else { (r, h) };
            if g.has_edge(kind.rel(), s, t) {
                continue;
            }
            let role = (kind == LinkKind::OrganizationMembership)
                .then(|| holder.text("organization_role").unwrap_or("member").to_string());
            rows.push((
                cursor.clone(),
                LinkCandidate {
                    source: g.key(s),
                    target: g.key(t),
                    role,
                    cursor: cursor.clone(),
                },
            ));
        }
    }
    rows
}

fn team_member_links(g: &GraphSnapshot) -> Vec<(String, LinkCandidate)> {
    let mut rows = Vec::new();
    for (t, team) in g.live(EntityKind::Team) {
        let Some(team_id) = team.text("id") else {
            continue;
        };
        let members = team
            .props
            .get("member_ids")
            .map(PropertyValue::string_items)
            .unwrap_or_default();
        for member in members {
            let cursor = format!("{team_id}/{member}");
            for u in g.find_id(EntityKind::User, &member) {
                if g.has_edge(RelType::MemberOf, u, t) {
                    continue;
                }
                rows.push((
                    cursor.clone(),
                    LinkCandidate {
                        source: NodeKey::id(member.as_str()),
                        target: NodeKey::id(team_id),
                        role: Some("member".to_string()),
                        cursor: cursor.clone(),
                    },
                ));
            }
        }
    }
    rows
}

fn is_orphan_org_space(g: &GraphSnapshot, space: &StoredNode) -> bool {
    if space.text("space_type") != Some("organization") {
        return false;
    }
    match space.text("owner_id") {
        Some(owner) => g.by_id(EntityKind::Organization, owner).is_none(),
        None => true,
    }
}

/// Stored string value, or `""`, matching `coalesce(x, '')` comparisons.
fn coalesced<'a>(node: &'a StoredNode, name: &str) -> &'a str {
    node.props
        .get(name)
        .and_then(PropertyValue::as_str)
        .unwrap_or_default()
}

fn violations(g: &GraphSnapshot, invariant: Invariant) -> usize {
    match invariant {
        Invariant::PersonalSpacesWithoutSingleOwner => g
            .live(EntityKind::Space)
            .filter(|(_, s)| s.text("space_type") == Some("personal"))
            .filter(|(i, s)| {
                let owners = g.incoming(RelType::Owns, *i, EntityKind::User);
                let matching = owners
                    .iter()
                    .filter(|u| {
                        u.text("personal_space_id").is_some()
                            && u.text("personal_space_id") == s.text("id")
                    })
                    .count();
                owners.len() != 1 || matching != 1
            })
            .count(),
        Invariant::UsersWithoutOwnsRelationship => g
            .live(EntityKind::User)
            .filter(|(i, u)| match u.text("personal_space_id") {
                Some(space_id) => !g
                    .outgoing(RelType::Owns, *i, EntityKind::Space)
                    .iter()
                    .any(|s| s.text("id") == Some(space_id)),
                None => false,
            })
            .count(),
        Invariant::UsersOwningForeignSpaces => g
            .live(EntityKind::User)
            .filter(|(i, u)| {
                g.outgoing(RelType::Owns, *i, EntityKind::Space)
                    .iter()
                    .any(|s| coalesced(s, "id") != coalesced(u, "personal_space_id"))
            })
            .count(),
        Invariant::OrgSpacesWithoutSingleHasSpace => g
            .live(EntityKind::Space)
            .filter(|(_, s)| s.text("space_type") == Some("organization"))
            .filter(|(i, s)| {
                let owners = g.incoming(RelType::HasSpace, *i, EntityKind::Organization);
                let matching = owners
                    .iter()
                    .filter(|o| o.text("id").is_some() && o.text("id") == s.text("owner_id"))
                    .count();
                owners.len() != 1 || matching != 1
            })
            .count(),
        Invariant::OrphanedOrgSpaces => g
            .live(EntityKind::Space)
            .filter(|(_, s)| is_orphan_org_space(g, s))
            .count(),
        Invariant::OrganizationsWithoutSpace => g
            .live(EntityKind::Organization)
            .filter(|(i, _)| {
                g.outgoing(RelType::HasSpace, *i, EntityKind::Space)
                    .is_empty()
            })
            .count(),
        Invariant::OrphanedNotebooks => g
            .live(EntityKind::Notebook)
            .filter(|(_, n)| {
                n.text("space_id")
                    .is_some_and(|id| g.by_id(EntityKind::Space, id).is_none())
            })
            .count(),
        Invariant::NotebooksWithoutBelongsTo => g
            .live(EntityKind::Notebook)
            .filter(|(i, n)| {
                let Some(space_id) = n.text("space_id") else {
                    return false;
                };
                if g.by_id(EntityKind::Space, space_id).is_none() {
                    return false;
                }
                let targets = g.outgoing(RelType::BelongsTo, *i, EntityKind::Space);
                let matching = targets
                    .iter()
                    .filter(|s| s.text("id") == Some(space_id))
                    .count();
                targets.len() != 1 || matching != 1
            })
            .count(),
        Invariant::OrphanedDocuments => g
            .live(EntityKind::Document)
            .filter(|(_, d)| {
                d.text("notebook_id")
                    .is_some_and(|id| g.by_id(EntityKind::Notebook, id).is_none())
            })
            .count(),
        Invariant::DocumentsScopeMismatch => g
            .live(EntityKind::Document)
            .map(|(_, d)| {
                let Some(notebook_id) = d.text("notebook_id") else {
                    return 0;
                };
                g.find_id(EntityKind::Notebook, notebook_id)
                    .into_iter()
                    .filter_map(|i| g.node(i))
                    .filter(|n| {
                        ["tenant_id", "space_id", "space_type"]
                            .iter()
                            .any(|f| coalesced(d, f) != coalesced(n, f))
                    })
                    .count()
            })
            .sum(),
        Invariant::DuplicateChunks => {
            let mut copies: HashMap<(Option<String>, Option<String>), usize> = HashMap::new();
            for (_, c) in g.live(EntityKind::Chunk) {
                *copies
                    .entry((owned(c.text("file_id")), c.chunk_id()))
                    .or_default() += 1;
            }
            copies.values().filter(|&&n| n > 1).count()
        }
        Invariant::DuplicateRelationships => {
            let mut copies: HashMap<(usize, usize, RelType), usize> = HashMap::new();
            for e in &g.edges {
                *copies.entry((e.source, e.target, e.rel)).or_default() += 1;
            }
            copies.values().filter(|&&n| n > 1).count()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> RunId {
        RunId::parse("mig-test").unwrap()
    }

    #[tokio::test]
    async fn selection_pages_by_key() {
        let graph = MemoryGraph::new();
        for id in ["u3", "u1", "u2"] {
            graph.insert_node(EntityKind::User, [("id", id)]).await;
        }

        let first = graph
            .users_missing_personal_space(&Page::first(2))
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            ["u1", "u2"]
        );

        let rest = graph
            .users_missing_personal_space(&Page::first(2).next("u2"))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "u3");
    }

    #[tokio::test]
    async fn empty_string_counts_as_missing() {
        let graph = MemoryGraph::new();
        graph
            .insert_node(EntityKind::Organization, [("id", "org_1"), ("tenant_id", "")])
            .await;
        let seeds = graph
            .organizations_missing_tenant(&Page::first(10))
            .await
            .unwrap();
        assert_eq!(seeds.len(), 1);
    }

    #[tokio::test]
    async fn guarded_fill_never_overwrites() {
        let graph = MemoryGraph::new();
        graph
            .insert_node(
                EntityKind::User,
                [("id", "u1"), ("personal_tenant_id", "tenant_keep")],
            )
            .await;
        let params = UserBackfill {
            user_id: "u1".into(),
            tenant_id: "tenant_other".into(),
            space_id: "space_keep".into(),
            stamp: FieldStamp::new(&run()),
        };

        assert!(graph.backfill_user(&params).await.unwrap());
        assert!(!graph.backfill_user(&params).await.unwrap());

        let tenant = graph.property(EntityKind::User, "u1", "personal_tenant_id").await;
        assert_eq!(tenant, Some("tenant_keep".into()));
        let filled = graph
            .property(EntityKind::User, "u1", "backfilled_fields")
            .await
            .unwrap();
        assert_eq!(filled.string_items(), vec!["personal_space_id".to_string()]);
    }

    #[tokio::test]
    async fn link_is_created_once() {
        let graph = MemoryGraph::new();
        let nb = graph.insert_node(EntityKind::Notebook, [("id", "n1")]).await;
        let sp = graph.insert_node(EntityKind::Space, [("id", "s1")]).await;
        let params = LinkParams {
            source: nb.clone(),
            target: sp.clone(),
            role: None,
            provenance: Provenance::new(&run(), LinkKind::BelongsTo.step()),
        };

        assert!(graph.link(LinkKind::BelongsTo, &params).await.unwrap());
        assert!(!graph.link(LinkKind::BelongsTo, &params).await.unwrap());
        assert_eq!(graph.edge_count(RelType::BelongsTo, &nb, &sp).await, 1);
    }

    #[tokio::test]
    async fn json_fixtures_reject_nested_values() {
        let graph = MemoryGraph::new();
        let key = graph
            .insert_json(
                EntityKind::Chunk,
                json!({"file_id": "d1", "chunk_id": 4, "tenant_id": null}),
            )
            .await
            .unwrap();
        assert_eq!(key, NodeKey::chunk("d1", "4"));

        let err = graph
            .insert_json(EntityKind::Team, json!({"id": "t1", "member_ids": [["u1"]]}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("$.member_ids[0]"));
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let graph = MemoryGraph::new();
        graph.set_offline(true).await;
        let err = graph.verify_connectivity().await.unwrap_err();
        assert!(err.is_systemic());
    }

    #[tokio::test]
    async fn duplicate_chunks_are_counted_per_key() {
        let graph = MemoryGraph::new();
        for _ in 0..2 {
            graph
                .insert_json(EntityKind::Chunk, json!({"file_id": "d1", "chunk_id": "0"}))
                .await
                .unwrap();
        }
        graph
            .insert_json(EntityKind::Chunk, json!({"file_id": "d1", "chunk_id": 0}))
            .await
            .unwrap();
        graph
            .insert_json(EntityKind::Chunk, json!({"file_id": "d1", "chunk_id": "1"}))
            .await
            .unwrap();
        assert_eq!(
            graph
                .count_violations(Invariant::DuplicateChunks)
                .await
                .unwrap(),
            1
        );
    }
}
