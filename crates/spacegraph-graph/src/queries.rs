//! Read operations: gap selection, link candidates, and invariant counts.
//!
//! Selections are keyset-paginated by node key (`cursor > $after`), so a
//! record that is skipped is never selected twice in one pass. A canonical
//! string field counts as missing when it is null or empty.

use neo4rs::query;
use spacegraph_core::{Invariant, LinkKind, NodeKey, OrphanSpace, RelType, RunId, Scope, ScopeKind};

use crate::client::{opt_text, text, GraphClient, GraphError};
use crate::store::{
    GraphReader, LinkCandidate, OrganizationSeed, Page, PersonalSpaceSeed, ScopeSeed, SpaceClaim,
    UserSeed,
};

impl GraphReader for GraphClient {
    async fn verify_connectivity(&self) -> Result<(), GraphError> {
        self.ping().await
    }

    async fn users_missing_personal_space(
        &self,
        page: &Page,
    ) -> Result<Vec<UserSeed>, GraphError> {
        let q = query(
            "MATCH (u:User)
             WHERE coalesce(u.personal_space_id, '') = '' AND u.id > $after
             RETURN u.id AS id, coalesce(u.personal_tenant_id, '') AS legacy_tenant_id
             ORDER BY u.id
             LIMIT $limit",
        )
        .param("after", page.after.clone())
        .param("limit", page.limit as i64);

        let rows = self.query_rows(q).await?;
        let mut seeds = Vec::with_capacity(rows.len());
        for row in rows {
            seeds.push(UserSeed {
                id: text(&row, "id")?,
                legacy_tenant_id: opt_text(&row, "legacy_tenant_id")?,
            });
        }
        Ok(seeds)
    }

    async fn personal_space_claimed(&self, claim: &SpaceClaim) -> Result<bool, GraphError> {
        let q = query(
            "OPTIONAL MATCH (other:User {personal_space_id: $space_id})
             WHERE other.id <> $user_id
             WITH count(other) AS users
             OPTIONAL MATCH (s:Space {id: $space_id})
             WHERE coalesce(s.space_type, '') <> 'personal'
                OR (coalesce(s.owner_id, '') <> '' AND s.owner_id <> $user_id)
             RETURN users + count(s) AS claims",
        )
        .param("space_id", claim.space_id.clone())
        .param("user_id", claim.user_id.clone());

        Ok(self.query_count(q, "claims").await? > 0)
    }

    async fn organizations_missing_tenant(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError> {
        let q = query(
            "MATCH (o:Organization)
             WHERE coalesce(o.tenant_id, '') = '' AND o.id > $after
             RETURN o.id AS id, '' AS tenant_id, coalesce(o.name, '') AS name
             ORDER BY o.id
             LIMIT $limit",
        )
        .param("after", page.after.clone())
        .param("limit", page.limit as i64);

        organization_rows(self.query_rows(q).await?)
    }

    async fn personal_spaces_missing(
        &self,
        page: &Page,
    ) -> Result<Vec<PersonalSpaceSeed>, GraphError> {
        let q = query(
            "MATCH (u:User)
             WHERE coalesce(u.personal_space_id, '') <> '' AND u.id > $after
               AND NOT EXISTS { MATCH (:Space {id: u.personal_space_id}) }
             RETURN u.id AS user_id, u.personal_space_id AS space_id,
                    coalesce(u.personal_tenant_id, '') AS tenant_id
             ORDER BY u.id
             LIMIT $limit",
        )
        .param("after", page.after.clone())
        .param("limit", page.limit as i64);

        let rows = self.query_rows(q).await?;
        let mut seeds = Vec::with_capacity(rows.len());
        for row in rows {
            seeds.push(PersonalSpaceSeed {
                user_id: text(&row, "user_id")?,
                space_id: text(&row, "space_id")?,
                tenant_id: opt_text(&row, "tenant_id")?,
            });
        }
        Ok(seeds)
    }

    async fn scopes_missing(
        &self,
        kind: ScopeKind,
        page: &Page,
    ) -> Result<Vec<ScopeSeed>, GraphError> {
        let q = query(scope_selection(kind))
            .param("after", page.after.clone())
            .param("limit", page.limit as i64);

        let rows = self.query_rows(q).await?;
        let mut seeds = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match kind {
                ScopeKind::Chunk => NodeKey::chunk(text(&row, "file_id")?, text(&row, "chunk_id")?),
                _ => NodeKey::id(text(&row, "id")?),
            };
            seeds.push(ScopeSeed {
                key,
                tenant_id: opt_text(&row, "tenant_id")?,
                space_id: opt_text(&row, "space_id")?,
                space_type: opt_text(&row, "space_type")?,
                declared: Scope::from_parts(
                    &text(&row, "declared_tenant")?,
                    &text(&row, "declared_space")?,
                    &text(&row, "declared_type")?,
                ),
                owner: Scope::from_parts(
                    &text(&row, "owner_tenant")?,
                    &text(&row, "owner_space")?,
                    &text(&row, "owner_type")?,
                ),
            });
        }
        Ok(seeds)
    }

    async fn link_candidates(
        &self,
        kind: LinkKind,
        page: &Page,
    ) -> Result<Vec<LinkCandidate>, GraphError> {
        let q = query(link_selection(kind))
            .param("after", page.after.clone())
            .param("limit", page.limit as i64);

        let rows = self.query_rows(q).await?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let target = match kind {
                LinkKind::DocumentContains => {
                    NodeKey::chunk(text(&row, "target_file")?, text(&row, "target_chunk")?)
                }
                _ => NodeKey::id(text(&row, "target")?),
            };
            candidates.push(LinkCandidate {
                source: NodeKey::id(text(&row, "source")?),
                target,
                role: opt_text(&row, "role")?,
                cursor: text(&row, "cursor")?,
            });
        }
        Ok(candidates)
    }

    async fn organizations_without_space(
        &self,
        page: &Page,
    ) -> Result<Vec<OrganizationSeed>, GraphError> {
        let q = query(
            "MATCH (o:Organization)
             WHERE o.id > $after AND NOT (o)-[:HAS_SPACE]->(:Space)
             RETURN o.id AS id, coalesce(o.tenant_id, '') AS tenant_id,
                    coalesce(o.name, '') AS name
             ORDER BY o.id
             LIMIT $limit",
        )
        .param("after", page.after.clone())
        .param("limit", page.limit as i64);

        organization_rows(self.query_rows(q).await?)
    }

    async fn orphan_spaces(&self) -> Result<Vec<OrphanSpace>, GraphError> {
        let q = query(
            "MATCH (s:Space {space_type: 'organization'})
             WHERE coalesce(s.owner_id, '') = ''
                OR NOT EXISTS { MATCH (:Organization {id: s.owner_id}) }
             RETURN s.id AS space_id, coalesce(s.owner_id, '') AS owner_id
             ORDER BY s.id",
        );

        let rows = self.query_rows(q).await?;
        let mut orphans = Vec::with_capacity(rows.len());
        for row in rows {
            orphans.push(OrphanSpace {
                space_id: text(&row, "space_id")?,
                claimed_owner_id: text(&row, "owner_id")?,
            });
        }
        Ok(orphans)
    }

    async fn count_violations(&self, invariant: Invariant) -> Result<u64, GraphError> {
        let mut q = query(violation_query(invariant));
        if invariant == Invariant::DuplicateRelationships {
            let types: Vec<String> = RelType::ALL.iter().map(|r| r.cypher().to_string()).collect();
            q = q.param("types", types);
        }
        self.query_count(q, "violations").await
    }

    async fn count_run_artifacts(&self, run_id: &RunId) -> Result<u64, GraphError> {
        let q = query(
            "CALL {
               MATCH ()-[r]->() WHERE r.migration_run = $run RETURN count(r) AS found
               UNION ALL
               MATCH (n) WHERE n.migration_run = $run OR n.backfill_run = $run
               RETURN count(n) AS found
             }
             RETURN sum(found) AS artifacts",
        )
        .param("run", run_id.as_str());

        self.query_count(q, "artifacts").await
    }
}

fn organization_rows(rows: Vec<neo4rs::Row>) -> Result<Vec<OrganizationSeed>, GraphError> {
    let mut seeds = Vec::with_capacity(rows.len());
    for row in rows {
        seeds.push(OrganizationSeed {
            id: text(&row, "id")?,
            tenant_id: opt_text(&row, "tenant_id")?,
            name: opt_text(&row, "name")?,
        });
    }
    Ok(seeds)
}

// ── Cypher ───────────────────────────────────────────────────────

/// Every scope selection returns the same columns; inapplicable ones are `''`.
fn scope_selection(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Space => {
            "MATCH (s:Space)
             WHERE coalesce(s.tenant_id, '') = '' AND s.id > $after
             OPTIONAL MATCH (u:User {id: s.owner_id}) WHERE s.space_type = 'personal'
             OPTIONAL MATCH (o:Organization {id: s.owner_id}) WHERE s.space_type = 'organization'
             RETURN s.id AS id, '' AS file_id, '' AS chunk_id,
                    '' AS tenant_id, s.id AS space_id, coalesce(s.space_type, '') AS space_type,
                    '' AS declared_tenant, '' AS declared_space, '' AS declared_type,
                    coalesce(u.personal_tenant_id, o.tenant_id, '') AS owner_tenant,
                    s.id AS owner_space, coalesce(s.space_type, '') AS owner_type
             ORDER BY s.id
             LIMIT $limit"
        }
        ScopeKind::Notebook => {
            "MATCH (n:Notebook)
             WHERE (coalesce(n.tenant_id, '') = '' OR coalesce(n.space_id, '') = ''
                    OR coalesce(n.space_type, '') = '')
               AND n.id > $after
             OPTIONAL MATCH (s:Space {id: n.space_id})
             OPTIONAL MATCH (u:User {id: n.owner_id})
             RETURN n.id AS id, '' AS file_id, '' AS chunk_id,
                    coalesce(n.tenant_id, '') AS tenant_id, coalesce(n.space_id, '') AS space_id,
                    coalesce(n.space_type, '') AS space_type,
                    coalesce(s.tenant_id, '') AS declared_tenant, coalesce(s.id, '') AS declared_space,
                    coalesce(s.space_type, '') AS declared_type,
                    coalesce(u.personal_tenant_id, '') AS owner_tenant,
                    coalesce(u.personal_space_id, '') AS owner_space,
                    CASE WHEN u IS NULL THEN '' ELSE 'personal' END AS owner_type
             ORDER BY n.id
             LIMIT $limit"
        }
        ScopeKind::Document => {
            "MATCH (d:Document)
             WHERE (coalesce(d.tenant_id, '') = '' OR coalesce(d.space_id, '') = ''
                    OR coalesce(d.space_type, '') = '')
               AND d.id > $after
             OPTIONAL MATCH (n:Notebook {id: d.notebook_id})
             RETURN d.id AS id, '' AS file_id, '' AS chunk_id,
                    coalesce(d.tenant_id, '') AS tenant_id, coalesce(d.space_id, '') AS space_id,
                    coalesce(d.space_type, '') AS space_type,
                    coalesce(n.tenant_id, '') AS declared_tenant, coalesce(n.space_id, '') AS declared_space,
                    coalesce(n.space_type, '') AS declared_type,
                    '' AS owner_tenant, '' AS owner_space, '' AS owner_type
             ORDER BY d.id
             LIMIT $limit"
        }
        ScopeKind::Chunk => {
            "MATCH (c:Chunk)
             WITH c, coalesce(c.file_id, '') + '::' + coalesce(toString(c.chunk_id), '') AS cursor
             WHERE (coalesce(c.tenant_id, '') = '' OR coalesce(c.space_id, '') = ''
                    OR coalesce(c.space_type, '') = '')
               AND cursor > $after
             OPTIONAL MATCH (d:Document {id: c.file_id})
             RETURN '' AS id, coalesce(c.file_id, '') AS file_id,
                    coalesce(toString(c.chunk_id), '') AS chunk_id,
                    coalesce(c.tenant_id, '') AS tenant_id, coalesce(c.space_id, '') AS space_id,
                    coalesce(c.space_type, '') AS space_type,
                    coalesce(d.tenant_id, '') AS declared_tenant, coalesce(d.space_id, '') AS declared_space,
                    coalesce(d.space_type, '') AS declared_type,
                    '' AS owner_tenant, '' AS owner_space, '' AS owner_type
             ORDER BY cursor
             LIMIT $limit"
        }
    }
}

/// Pairs implied by a scalar foreign key whose edge does not exist yet.
fn link_selection(kind: LinkKind) -> &'static str {
    match kind {
        LinkKind::Owns => {
            "MATCH (u:User)
             WHERE coalesce(u.personal_space_id, '') <> '' AND u.id > $after
             MATCH (s:Space {id: u.personal_space_id})
             WHERE coalesce(s.space_type, '') IN ['', 'personal'] AND NOT (u)-[:OWNS]->(s)
             RETURN u.id AS source, s.id AS target, '' AS target_file, '' AS target_chunk,
                    '' AS role, u.id AS cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::HasSpace => {
            "MATCH (s:Space {space_type: 'organization'})
             WHERE s.id > $after
             MATCH (o:Organization {id: s.owner_id})
             WHERE NOT (o)-[:HAS_SPACE]->(s)
             RETURN o.id AS source, s.id AS target, '' AS target_file, '' AS target_chunk,
                    '' AS role, s.id AS cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::BelongsTo => {
            "MATCH (n:Notebook)
             WHERE coalesce(n.space_id, '') <> '' AND n.id > $after
             MATCH (s:Space {id: n.space_id})
             WHERE NOT (n)-[:BELONGS_TO]->(s)
             RETURN n.id AS source, s.id AS target, '' AS target_file, '' AS target_chunk,
                    '' AS role, n.id AS cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::OrganizationMembership => {
            "MATCH (u:User)
             WHERE coalesce(u.organization_id, '') <> '' AND u.id > $after
             MATCH (o:Organization {id: u.organization_id})
             WHERE NOT (u)-[:MEMBER_OF]->(o)
             RETURN u.id AS source, o.id AS target, '' AS target_file, '' AS target_chunk,
                    coalesce(u.organization_role, 'member') AS role, u.id AS cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::TeamMembership => {
            "MATCH (t:Team)
             UNWIND coalesce(t.member_ids, []) AS member_id
             WITH t, member_id, t.id + '/' + member_id AS cursor
             WHERE cursor > $after
             MATCH (u:User {id: member_id})
             WHERE NOT (u)-[:MEMBER_OF]->(t)
             RETURN u.id AS source, t.id AS target, '' AS target_file, '' AS target_chunk,
                    'member' AS role, cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::NotebookContains => {
            "MATCH (d:Document)
             WHERE coalesce(d.notebook_id, '') <> '' AND d.id > $after
             MATCH (n:Notebook {id: d.notebook_id})
             WHERE NOT (n)-[:CONTAINS]->(d)
             RETURN n.id AS source, d.id AS target, '' AS target_file, '' AS target_chunk,
                    '' AS role, d.id AS cursor
             ORDER BY cursor
             LIMIT $limit"
        }
        LinkKind::DocumentContains => {
            "MATCH (c:Chunk)
             WHERE coalesce(c.file_id, '') <> ''
             WITH c, c.file_id + '::' + coalesce(toString(c.chunk_id), '') AS cursor
             WHERE cursor > $after
             MATCH (d:Document {id: c.file_id})
             WHERE NOT (d)-[:CONTAINS]->(c)
             RETURN d.id AS source, '' AS target, c.file_id AS target_file,
                    coalesce(toString(c.chunk_id), '') AS target_chunk, '' AS role, cursor
             ORDER BY cursor
             LIMIT $limit"
        }
    }
}

fn violation_query(invariant: Invariant) -> &'static str {
    match invariant {
        Invariant::PersonalSpacesWithoutSingleOwner => {
            "MATCH (s:Space {space_type: 'personal'})
             OPTIONAL MATCH (u:User)-[:OWNS]->(s)
             WITH s, count(u) AS owners,
                  sum(CASE WHEN u.personal_space_id = s.id THEN 1 ELSE 0 END) AS matching
             WHERE owners <> 1 OR matching <> 1
             RETURN count(s) AS violations"
        }
        Invariant::UsersWithoutOwnsRelationship => {
            "MATCH (u:User)
             WHERE coalesce(u.personal_space_id, '') <> ''
               AND NOT EXISTS { MATCH (u)-[:OWNS]->(:Space {id: u.personal_space_id}) }
             RETURN count(u) AS violations"
        }
        Invariant::UsersOwningForeignSpaces => {
            "MATCH (u:User)-[:OWNS]->(s:Space)
             WHERE s.id <> coalesce(u.personal_space_id, '')
             RETURN count(DISTINCT u) AS violations"
        }
        Invariant::OrgSpacesWithoutSingleHasSpace => {
            "MATCH (s:Space {space_type: 'organization'})
             OPTIONAL MATCH (o:Organization)-[:HAS_SPACE]->(s)
             WITH s, count(o) AS owners,
                  sum(CASE WHEN o.id = s.owner_id THEN 1 ELSE 0 END) AS matching
             WHERE owners <> 1 OR matching <> 1
             RETURN count(s) AS violations"
        }
        Invariant::OrphanedOrgSpaces => {
            "MATCH (s:Space {space_type: 'organization'})
             WHERE coalesce(s.owner_id, '') = ''
                OR NOT EXISTS { MATCH (:Organization {id: s.owner_id}) }
             RETURN count(s) AS violations"
        }
        Invariant::OrganizationsWithoutSpace => {
            "MATCH (o:Organization)
             WHERE NOT (o)-[:HAS_SPACE]->(:Space)
             RETURN count(o) AS violations"
        }
        Invariant::OrphanedNotebooks => {
            "MATCH (n:Notebook)
             WHERE coalesce(n.space_id, '') <> ''
               AND NOT EXISTS { MATCH (:Space {id: n.space_id}) }
             RETURN count(n) AS violations"
        }
        Invariant::NotebooksWithoutBelongsTo => {
            "MATCH (n:Notebook)
             WHERE coalesce(n.space_id, '') <> ''
               AND EXISTS { MATCH (:Space {id: n.space_id}) }
             OPTIONAL MATCH (n)-[:BELONGS_TO]->(s:Space)
             WITH n, count(s) AS total,
                  sum(CASE WHEN s.id = n.space_id THEN 1 ELSE 0 END) AS matching
             WHERE total <> 1 OR matching <> 1
             RETURN count(n) AS violations"
        }
        Invariant::OrphanedDocuments => {
            "MATCH (d:Document)
             WHERE coalesce(d.notebook_id, '') <> ''
               AND NOT EXISTS { MATCH (:Notebook {id: d.notebook_id}) }
             RETURN count(d) AS violations"
        }
        Invariant::DocumentsScopeMismatch => {
            "MATCH (d:Document)
             MATCH (n:Notebook {id: d.notebook_id})
             WHERE coalesce(d.tenant_id, '') <> coalesce(n.tenant_id, '')
                OR coalesce(d.space_id, '') <> coalesce(n.space_id, '')
                OR coalesce(d.space_type, '') <> coalesce(n.space_type, '')
             RETURN count(d) AS violations"
        }
        Invariant::DuplicateChunks => {
            "MATCH (c:Chunk)
             WITH c.file_id AS file_id, toString(c.chunk_id) AS chunk_id, count(*) AS copies
             WHERE copies > 1
             RETURN count(*) AS violations"
        }
        Invariant::DuplicateRelationships => {
            "MATCH (a)-[r]->(b)
             WHERE type(r) IN $types
             WITH a, b, type(r) AS rel, count(r) AS copies
             WHERE copies > 1
             RETURN count(*) AS violations"
        }
    }
}
