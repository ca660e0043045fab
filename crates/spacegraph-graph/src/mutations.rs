//! Guarded write operations against Neo4j.
//!
//! Every write re-checks its precondition inside the statement itself
//! (missing field, absent edge, absent node), so two runs racing on the
//! same record cannot double-write.

use neo4rs::{query, Query};
use spacegraph_core::{EntityKind, LinkKind, NodeKey, RelType, RunId, ScopeKind};

use crate::client::{count_column, GraphClient, GraphError};
use crate::store::{
    DefaultSpaceCreate, GraphWriter, LinkParams, NodeRemoval, OrganizationBackfill,
    PersonalSpaceCreate, Provenance, SchemaStatement, ScopeBackfill, UserBackfill,
};

impl GraphWriter for GraphClient {
    async fn apply_schema(&self, statement: &SchemaStatement) -> Result<(), GraphError> {
        self.run(query(statement.cypher)).await
    }

    // ── Field Backfills ──────────────────────────────────────────

    async fn backfill_user(&self, params: &UserBackfill) -> Result<bool, GraphError> {
        let cypher = guarded_fill(
            "MATCH (n:User {id: $id})",
            EntityKind::User.canonical_fields(),
        );
        let q = query(&cypher)
            .param("id", params.user_id.clone())
            .param("personal_tenant_id", params.tenant_id.clone())
            .param("personal_space_id", params.space_id.clone())
            .param("now", params.stamp.timestamp())
            .param("run", params.stamp.run_id.as_str());

        Ok(self.query_count(q, "updated").await? > 0)
    }

    async fn backfill_organization(
        &self,
        params: &OrganizationBackfill,
    ) -> Result<bool, GraphError> {
        let cypher = guarded_fill(
            "MATCH (n:Organization {id: $id})",
            EntityKind::Organization.canonical_fields(),
        );
        let q = query(&cypher)
            .param("id", params.organization_id.clone())
            .param("tenant_id", params.tenant_id.clone())
            .param("now", params.stamp.timestamp())
            .param("run", params.stamp.run_id.as_str());

        Ok(self.query_count(q, "updated").await? > 0)
    }

    async fn backfill_scope(
        &self,
        kind: ScopeKind,
        params: &ScopeBackfill,
    ) -> Result<bool, GraphError> {
        let entity = kind.entity();
        let cypher = guarded_fill(&node_match("n", entity, "key"), entity.canonical_fields());
        let q = bind_key(query(&cypher), "key", &params.key)
            .param("tenant_id", params.scope.tenant_id.clone())
            .param("space_id", params.scope.space_id.clone())
            .param("space_type", params.scope.space_type.as_str())
            .param("now", params.stamp.timestamp())
            .param("run", params.stamp.run_id.as_str());

        Ok(self.query_count(q, "updated").await? > 0)
    }

    // ── Node Creation ────────────────────────────────────────────

    async fn create_personal_space(
        &self,
        params: &PersonalSpaceCreate,
    ) -> Result<bool, GraphError> {
        let q = query(
            "MATCH (u:User {id: $user_id})
             WHERE NOT EXISTS { MATCH (:Space {id: $space_id}) }
             MERGE (s:Space {id: $space_id})
             ON CREATE SET s.space_type = 'personal',
                           s.owner_id = $user_id,
                           s.owner_type = 'user',
                           s.status = 'active',
                           s.name = 'Personal',
                           s.tenant_id = $tenant_id,
                           s.updated_at = $now,
                           s.created_at = $now,
                           s.migrated = true,
                           s.migration_run = $run,
                           s.migration_step = $step
             RETURN count(s) AS created",
        )
        .param("user_id", params.user_id.clone())
        .param("space_id", params.space_id.clone())
        .param("tenant_id", params.tenant_id.clone());

        Ok(self.query_count(with_provenance(q, &params.provenance), "created").await? > 0)
    }

    async fn create_default_space(
        &self,
        params: &DefaultSpaceCreate,
    ) -> Result<bool, GraphError> {
        let q = query(
            "MATCH (o:Organization {id: $organization_id})
             WHERE NOT (o)-[:HAS_SPACE]->(:Space)
             MERGE (s:Space {id: $space_id})
             ON CREATE SET s.space_type = 'organization',
                           s.owner_id = $organization_id,
                           s.owner_type = 'organization',
                           s.status = 'active',
                           s.name = $name,
                           s.tenant_id = $tenant_id,
                           s.updated_at = $now,
                           s.created_at = $now,
                           s.migrated = true,
                           s.migration_run = $run,
                           s.migration_step = $step
             MERGE (o)-[r:HAS_SPACE]->(s)
             ON CREATE SET r.created_at = $now,
                           r.migrated = true,
                           r.migration_run = $run,
                           r.migration_step = $step,
                           r.is_default = true
             RETURN count(r) AS created",
        )
        .param("organization_id", params.organization_id.clone())
        .param("space_id", params.space_id.clone())
        .param("tenant_id", params.tenant_id.clone())
        .param("name", params.name.clone());

        Ok(self.query_count(with_provenance(q, &params.provenance), "created").await? > 0)
    }

    // ── Relationship Upserts ─────────────────────────────────────

    async fn link(&self, kind: LinkKind, params: &LinkParams) -> Result<bool, GraphError> {
        let rel = kind.rel().cypher();
        let extra = match kind.rel() {
            RelType::HasSpace => ",\n                           r.is_default = false",
            RelType::MemberOf => ",\n                           r.role = $role",
            _ => "",
        };
        let cypher = format!(
            "{source}
             {target}
             WITH a, b WHERE NOT (a)-[:{rel}]->(b)
             MERGE (a)-[r:{rel}]->(b)
             ON CREATE SET r.created_at = $now,
                           r.migrated = true,
                           r.migration_run = $run,
                           r.migration_step = $step{extra}
             RETURN count(r) AS created",
            source = node_match("a", kind.source(), "source"),
            target = node_match("b", kind.target(), "target"),
        );

        let mut q = bind_key(query(&cypher), "source", &params.source);
        q = bind_key(q, "target", &params.target);
        if kind.rel() == RelType::MemberOf {
            q = q.param("role", params.role.clone().unwrap_or_else(|| "member".to_string()));
        }

        Ok(self.query_count(with_provenance(q, &params.provenance), "created").await? > 0)
    }

    // ── Rollback ─────────────────────────────────────────────────

    async fn remove_run_relationships(
        &self,
        rel: RelType,
        run_id: &RunId,
    ) -> Result<u64, GraphError> {
        let cypher = format!(
            "MATCH ()-[r:{rel}]->()
             WHERE r.migration_run = $run AND r.migrated = true
             WITH collect(r) AS tagged
             FOREACH (x IN tagged | DELETE x)
             RETURN size(tagged) AS removed",
            rel = rel.cypher(),
        );
        self.query_count(query(&cypher).param("run", run_id.as_str()), "removed")
            .await
    }

    async fn revert_run_fields(
        &self,
        kind: EntityKind,
        run_id: &RunId,
    ) -> Result<u64, GraphError> {
        let fields = kind.canonical_fields();
        if fields.is_empty() {
            return Ok(0);
        }

        let resets = fields
            .iter()
            .map(|f| format!("n.{f} = CASE WHEN '{f}' IN filled THEN null ELSE n.{f} END"))
            .collect::<Vec<_>>()
            .join(",\n                 ");
        let cypher = format!(
            "MATCH (n:{label})
             WHERE n.backfill_run = $run
             WITH n, coalesce(n.backfilled_fields, []) AS filled
             SET {resets}
             REMOVE n.backfill_run, n.backfilled_fields
             RETURN count(n) AS reverted",
            label = kind.label(),
        );
        self.query_count(query(&cypher).param("run", run_id.as_str()), "reverted")
            .await
    }

    async fn remove_run_spaces(&self, run_id: &RunId) -> Result<NodeRemoval, GraphError> {
        let q = query(
            "MATCH (s:Space)
             WHERE s.migration_run = $run AND s.migrated = true
             WITH s, (EXISTS { MATCH (s)--() }
                      OR EXISTS { MATCH (n:Notebook) WHERE n.space_id = s.id }) AS attached
             WITH collect(CASE WHEN attached THEN null ELSE s END) AS doomed,
                  sum(CASE WHEN attached THEN 1 ELSE 0 END) AS retained
             FOREACH (x IN doomed | DELETE x)
             RETURN size(doomed) AS removed, retained",
        )
        .param("run", run_id.as_str());

        match self.query_one(q).await? {
            Some(row) => Ok(NodeRemoval {
                removed: count_column(&row, "removed")?,
                retained: count_column(&row, "retained")?,
            }),
            None => Ok(NodeRemoval::default()),
        }
    }
}

// ── Statement builders ───────────────────────────────────────────

/// Fill only the listed fields that are still missing, recording which ones
/// were filled so a rollback can revert exactly those.
fn guarded_fill(matcher: &str, fields: &[&str]) -> String {
    let missing = fields
        .iter()
        .map(|f| format!("coalesce(n.{f}, '') = ''"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let names = fields
        .iter()
        .map(|f| format!("'{f}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let sets = fields
        .iter()
        .map(|f| format!("n.{f} = CASE WHEN '{f}' IN filled THEN ${f} ELSE n.{f} END"))
        .collect::<Vec<_>>()
        .join(",\n                 ");

    format!(
        "{matcher}
         WITH n WHERE {missing}
         WITH n, [k IN [{names}] WHERE coalesce(n[k], '') = ''] AS filled
         SET {sets},
             n.updated_at = $now,
             n.backfill_run = $run,
             n.backfilled_fields = filled
         RETURN count(n) AS updated"
    )
}

/// Match one node by key. Chunks are matched on both identifiers, with the
/// chunk identifier compared as a string.
fn node_match(var: &str, kind: EntityKind, param: &str) -> String {
    match kind {
        EntityKind::Chunk => format!(
            "MATCH ({var}:Chunk) WHERE {var}.file_id = ${param}_file \
             AND toString({var}.chunk_id) = ${param}_chunk"
        ),
        other => format!("MATCH ({var}:{label} {{id: ${param}}})", label = other.label()),
    }
}

fn bind_key(q: Query, param: &str, key: &NodeKey) -> Query {
    match key {
        NodeKey::Id(id) => q.param(param, id.clone()),
        NodeKey::Chunk { file_id, chunk_id } => q
            .param(&format!("{param}_file"), file_id.clone())
            .param(&format!("{param}_chunk"), chunk_id.clone()),
    }
}

fn with_provenance(q: Query, provenance: &Provenance) -> Query {
    q.param("now", provenance.timestamp())
        .param("run", provenance.run_id.as_str())
        .param("step", provenance.step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_fill_only_touches_missing_fields() {
        let cypher = guarded_fill("MATCH (n:Organization {id: $id})", &["tenant_id"]);
        assert!(cypher.contains("WITH n WHERE coalesce(n.tenant_id, '') = ''"));
        assert!(cypher.contains("CASE WHEN 'tenant_id' IN filled THEN $tenant_id"));
        assert!(cypher.contains("n.backfilled_fields = filled"));
    }

    #[test]
    fn chunk_match_uses_both_identifiers() {
        let cypher = node_match("b", EntityKind::Chunk, "target");
        assert!(cypher.contains("b.file_id = $target_file"));
        assert!(cypher.contains("toString(b.chunk_id) = $target_chunk"));
        assert_eq!(
            node_match("a", EntityKind::Notebook, "source"),
            "MATCH (a:Notebook {id: $source})"
        );
    }
}
