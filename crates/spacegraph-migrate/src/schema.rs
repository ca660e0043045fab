//! Schema Manager: uniqueness constraints and lookup indexes.
//!
//! Every statement is create-if-absent, so re-application is a no-op.
//! Statements are applied one at a time; a rejected statement is logged and
//! the rest still run.

use serde::Serialize;
use spacegraph_graph::store::SchemaStatement;
use spacegraph_graph::GraphWriter;

use crate::error::Result;
use crate::step::StepContext;

macro_rules! statement {
    ($name:literal, $cypher:literal) => {
        SchemaStatement {
            name: $name,
            cypher: $cypher,
        }
    };
}

/// The fixed, ordered schema declaration list.
pub const SCHEMA_STATEMENTS: &[SchemaStatement] = &[
    // ── Identity constraints ─────────────────────────────────────
    statement!(
        "user_id_unique",
        "CREATE CONSTRAINT user_id_unique IF NOT EXISTS FOR (n:User) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "organization_id_unique",
        "CREATE CONSTRAINT organization_id_unique IF NOT EXISTS FOR (n:Organization) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "team_id_unique",
        "CREATE CONSTRAINT team_id_unique IF NOT EXISTS FOR (n:Team) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "space_id_unique",
        "CREATE CONSTRAINT space_id_unique IF NOT EXISTS FOR (n:Space) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "notebook_id_unique",
        "CREATE CONSTRAINT notebook_id_unique IF NOT EXISTS FOR (n:Notebook) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "document_id_unique",
        "CREATE CONSTRAINT document_id_unique IF NOT EXISTS FOR (n:Document) REQUIRE n.id IS UNIQUE"
    ),
    statement!(
        "chunk_identity_unique",
        "CREATE CONSTRAINT chunk_identity_unique IF NOT EXISTS FOR (n:Chunk) REQUIRE (n.file_id, n.chunk_id) IS UNIQUE"
    ),
    // ── Foreign-key lookups ──────────────────────────────────────
    statement!(
        "user_personal_space_id",
        "CREATE INDEX user_personal_space_id IF NOT EXISTS FOR (n:User) ON (n.personal_space_id)"
    ),
    statement!(
        "user_organization_id",
        "CREATE INDEX user_organization_id IF NOT EXISTS FOR (n:User) ON (n.organization_id)"
    ),
    statement!(
        "space_owner_id",
        "CREATE INDEX space_owner_id IF NOT EXISTS FOR (n:Space) ON (n.owner_id)"
    ),
    statement!(
        "space_tenant_id",
        "CREATE INDEX space_tenant_id IF NOT EXISTS FOR (n:Space) ON (n.tenant_id)"
    ),
    statement!(
        "notebook_space_id",
        "CREATE INDEX notebook_space_id IF NOT EXISTS FOR (n:Notebook) ON (n.space_id)"
    ),
    statement!(
        "notebook_tenant_id",
        "CREATE INDEX notebook_tenant_id IF NOT EXISTS FOR (n:Notebook) ON (n.tenant_id)"
    ),
    statement!(
        "document_notebook_id",
        "CREATE INDEX document_notebook_id IF NOT EXISTS FOR (n:Document) ON (n.notebook_id)"
    ),
    statement!(
        "document_tenant_id",
        "CREATE INDEX document_tenant_id IF NOT EXISTS FOR (n:Document) ON (n.tenant_id)"
    ),
    statement!(
        "chunk_file_id",
        "CREATE INDEX chunk_file_id IF NOT EXISTS FOR (n:Chunk) ON (n.file_id)"
    ),
    // ── Provenance lookups (rollback) ────────────────────────────
    statement!(
        "space_migration_run",
        "CREATE INDEX space_migration_run IF NOT EXISTS FOR (n:Space) ON (n.migration_run)"
    ),
    statement!(
        "owns_migration_run",
        "CREATE INDEX owns_migration_run IF NOT EXISTS FOR ()-[r:OWNS]-() ON (r.migration_run)"
    ),
    statement!(
        "has_space_migration_run",
        "CREATE INDEX has_space_migration_run IF NOT EXISTS FOR ()-[r:HAS_SPACE]-() ON (r.migration_run)"
    ),
    statement!(
        "belongs_to_migration_run",
        "CREATE INDEX belongs_to_migration_run IF NOT EXISTS FOR ()-[r:BELONGS_TO]-() ON (r.migration_run)"
    ),
    statement!(
        "member_of_migration_run",
        "CREATE INDEX member_of_migration_run IF NOT EXISTS FOR ()-[r:MEMBER_OF]-() ON (r.migration_run)"
    ),
    statement!(
        "contains_migration_run",
        "CREATE INDEX contains_migration_run IF NOT EXISTS FOR ()-[r:CONTAINS]-() ON (r.migration_run)"
    ),
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchemaFailure {
    pub name: String,
    pub error: String,
}

/// Result of applying the schema list.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<SchemaFailure>,
}

impl SchemaOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} failed",
            self.applied.len(),
            self.failed.len()
        )
    }
}

/// Apply every statement in order. Only a systemic failure is an error.
pub async fn apply_schema<S: GraphWriter>(ctx: StepContext<'_, S>) -> Result<SchemaOutcome> {
    let mut outcome = SchemaOutcome::default();

    for (i, statement) in SCHEMA_STATEMENTS.iter().enumerate() {
        if i > 0 {
            ctx.throttle().await;
        }
        let applied = ctx
            .attempt("schema", statement.name, ctx.store.apply_schema(statement))
            .await?;
        match applied {
            Ok(()) => {
                tracing::debug!(statement = statement.name, "Schema statement applied");
                outcome.applied.push(statement.name.to_string());
            }
            Err(e) => outcome.failed.push(SchemaFailure {
                name: statement.name.to_string(),
                error: e.to_string(),
            }),
        }
    }

    tracing::info!(
        applied = outcome.applied.len(),
        failed = outcome.failed.len(),
        "Schema applied"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn statement_names_are_unique_and_idempotent() {
        let names: HashSet<_> = SCHEMA_STATEMENTS.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), SCHEMA_STATEMENTS.len());
        for statement in SCHEMA_STATEMENTS {
            assert!(
                statement.cypher.contains("IF NOT EXISTS"),
                "{} is not create-if-absent",
                statement.name
            );
            assert!(statement.cypher.contains(statement.name));
        }
    }
}
