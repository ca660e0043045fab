//! End-to-end migration scenarios against the in-memory graph.

use serde_json::json;
use spacegraph_core::ids::default_space_id;
use spacegraph_core::{EntityKind, Invariant, NodeKey, PropertyValue, RelType, RunId};
use spacegraph_graph::memory::Properties;
use spacegraph_graph::{GraphReader, MemoryGraph};
use spacegraph_journal::{FileJournalStore, JournalStore};

use spacegraph_migrate::config::{MigrateConfig, SchemeKind};
use spacegraph_migrate::rollback::confirmation_token;
use spacegraph_migrate::schema::SCHEMA_STATEMENTS;
use spacegraph_migrate::{MigrateError, MigrationRunner, RunState};

fn config() -> MigrateConfig {
    MigrateConfig {
        batch_size: 2,
        throttle_ms: 0,
        ..Default::default()
    }
}

fn run_id(raw: &str) -> RunId {
    RunId::parse(raw).unwrap()
}

fn runner(graph: MemoryGraph, run: &str) -> MigrationRunner<MemoryGraph> {
    MigrationRunner::new(graph, run_id(run), config()).without_journal()
}

fn text<'a>(props: &'a Properties, name: &str) -> Option<&'a str> {
    props.get(name).and_then(PropertyValue::as_str)
}

async fn insert(graph: &MemoryGraph, kind: EntityKind, value: serde_json::Value) {
    graph.insert_json(kind, value).await.unwrap();
}

/// Users, organizations, spaces, and content with typical legacy gaps.
async fn legacy_graph() -> MemoryGraph {
    let graph = MemoryGraph::new();
    insert(
        &graph,
        EntityKind::User,
        json!({"id": "u1", "personal_tenant_id": "tenant_123", "organization_id": "org_1", "organization_role": "admin"}),
    )
    .await;
    insert(&graph, EntityKind::Organization, json!({"id": "org_1", "name": "Acme"})).await;
    insert(&graph, EntityKind::Organization, json!({"id": "org_2", "name": "Globex"})).await;
    insert(
        &graph,
        EntityKind::Space,
        json!({"id": "sp1", "space_type": "organization", "owner_type": "organization", "owner_id": "org_1", "status": "active"}),
    )
    .await;
    insert(
        &graph,
        EntityKind::Space,
        json!({"id": "sp_orphan", "space_type": "organization", "owner_type": "organization", "owner_id": "org_missing", "status": "active"}),
    )
    .await;
    insert(&graph, EntityKind::Team, json!({"id": "t1", "member_ids": ["u1"]})).await;
    insert(&graph, EntityKind::Notebook, json!({"id": "n1", "owner_id": "u1"})).await;
    insert(&graph, EntityKind::Document, json!({"id": "d1", "notebook_id": "n1"})).await;
    insert(&graph, EntityKind::Chunk, json!({"file_id": "d1", "chunk_id": 0})).await;
    graph
}

#[tokio::test]
async fn test_notebook_inherits_owner_scope_and_is_linked() {
    let runner = runner(legacy_graph().await, "mig-1");
    let report = runner.run_all().await;
    assert_eq!(report.state, RunState::Completed { violations: 2 });

    let graph = runner.store();
    let notebook = graph.node(EntityKind::Notebook, &NodeKey::id("n1")).await.unwrap();
    assert_eq!(text(&notebook, "tenant_id"), Some("tenant_123"));
    assert_eq!(text(&notebook, "space_id"), Some("space_123"));
    assert_eq!(text(&notebook, "space_type"), Some("personal"));
    assert_eq!(
        graph
            .edge_count(RelType::BelongsTo, &NodeKey::id("n1"), &NodeKey::id("space_123"))
            .await,
        1
    );

    let space = graph.node(EntityKind::Space, &NodeKey::id("space_123")).await.unwrap();
    assert_eq!(text(&space, "owner_id"), Some("u1"));
    assert_eq!(text(&space, "tenant_id"), Some("tenant_123"));
    assert_eq!(text(&space, "migration_run"), Some("mig-1"));
}

#[tokio::test]
async fn test_organization_space_gets_single_has_space_edge() {
    let runner = runner(legacy_graph().await, "mig-1");
    runner.run_all().await;

    let edges: Vec<_> = runner
        .store()
        .edges(RelType::HasSpace)
        .await
        .into_iter()
        .filter(|e| e.target == NodeKey::id("sp1"))
        .collect();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, NodeKey::id("org_1"));
    assert_eq!(edges[0].props.get("migrated"), Some(&PropertyValue::Bool(true)));
    assert_eq!(edges[0].props.get("is_default"), Some(&PropertyValue::Bool(false)));
    assert_eq!(text(&edges[0].props, "migration_run"), Some("mig-1"));
    assert_eq!(text(&edges[0].props, "migration_step"), Some("link_has_space"));
}

#[tokio::test]
async fn test_organization_without_space_gets_default_space() {
    let runner = runner(legacy_graph().await, "mig-1");
    let report = runner.run_all().await;
    assert_eq!(report.link.as_ref().unwrap().default_spaces_created, 1);

    let graph = runner.store();
    let owned: Vec<_> = graph
        .nodes(EntityKind::Space)
        .await
        .into_iter()
        .filter(|s| text(s, "owner_id") == Some("org_2"))
        .collect();
    assert_eq!(owned.len(), 1);
    assert_eq!(text(&owned[0], "space_type"), Some("organization"));
    assert_eq!(text(&owned[0], "name"), Some("Default"));

    let default_id = default_space_id("org_2");
    assert_eq!(text(&owned[0], "id"), Some(default_id.as_str()));
    let edges: Vec<_> = graph
        .edges(RelType::HasSpace)
        .await
        .into_iter()
        .filter(|e| e.source == NodeKey::id("org_2"))
        .collect();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target, NodeKey::id(default_id.as_str()));
    assert_eq!(edges[0].props.get("is_default"), Some(&PropertyValue::Bool(true)));
}

#[tokio::test]
async fn test_second_run_creates_and_updates_nothing() {
    let first = runner(legacy_graph().await, "mig-1");
    let report = first.run_all().await;
    let link = report.link.unwrap();
    assert_eq!(link.owns_relationships_created, 1);
    assert_eq!(link.has_space_relationships_created, 1);
    assert_eq!(link.belongs_to_relationships_created, 1);
    assert_eq!(link.member_of_relationships_created, 2);
    assert_eq!(link.contains_relationships_created, 2);
    assert!(report.backfill.unwrap().total_updated() > 0);

    let second = runner(first.into_store(), "mig-2");
    let report = second.run_all().await;
    assert_eq!(report.state, RunState::Completed { violations: 2 });

    let backfill = report.backfill.unwrap();
    assert_eq!(backfill.total_updated(), 0);
    assert_eq!(backfill.total_failed(), 0);
    let link = report.link.unwrap();
    assert_eq!(link.owns_relationships_created, 0);
    assert_eq!(link.belongs_to_relationships_created, 0);
    assert_eq!(link.default_spaces_created, 0);
    assert_eq!(link.total_created(), 0);
    assert_eq!(
        second.store().count_run_artifacts(&run_id("mig-2")).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_orphan_space_is_reported_not_linked() {
    let runner = runner(legacy_graph().await, "mig-1");
    let report = runner.run_all().await;

    let orphans = &report.link.as_ref().unwrap().orphan_spaces;
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].space_id, "sp_orphan");
    assert_eq!(orphans[0].claimed_owner_id, "org_missing");

    let audit = report.audit.unwrap();
    assert_eq!(audit.violations(Invariant::OrphanedOrgSpaces), 1);
    assert_eq!(audit.violations(Invariant::OrgSpacesWithoutSingleHasSpace), 1);
    assert!(!audit.passed);

    let graph = runner.store();
    assert!(graph
        .edges(RelType::HasSpace)
        .await
        .iter()
        .all(|e| e.target != NodeKey::id("sp_orphan")));
    assert!(graph
        .node(EntityKind::Space, &NodeKey::id("sp_orphan"))
        .await
        .is_some());
}

#[tokio::test]
async fn test_invariants_hold_after_migration() {
    let runner = runner(legacy_graph().await, "mig-1");
    let report = runner.run_all().await;
    let audit = report.audit.unwrap();
    for invariant in [
        Invariant::PersonalSpacesWithoutSingleOwner,
        Invariant::UsersWithoutOwnsRelationship,
        Invariant::UsersOwningForeignSpaces,
        Invariant::NotebooksWithoutBelongsTo,
        Invariant::DocumentsScopeMismatch,
        Invariant::DuplicateChunks,
        Invariant::DuplicateRelationships,
    ] {
        assert_eq!(audit.violations(invariant), 0, "{}", invariant.column());
    }

    let graph = runner.store();
    for user in graph.nodes(EntityKind::User).await {
        let id = NodeKey::id(text(&user, "id").unwrap());
        let space = text(&user, "personal_space_id").unwrap();
        let owns: Vec<_> = graph
            .edges(RelType::Owns)
            .await
            .into_iter()
            .filter(|e| e.source == id)
            .collect();
        assert_eq!(owns.len(), 1);
        assert_eq!(owns[0].target, NodeKey::id(space));
    }

    let document = graph.node(EntityKind::Document, &NodeKey::id("d1")).await.unwrap();
    let notebook = graph.node(EntityKind::Notebook, &NodeKey::id("n1")).await.unwrap();
    for field in ["tenant_id", "space_id", "space_type"] {
        assert!(text(&document, field).is_some());
        assert_eq!(text(&document, field), text(&notebook, field));
    }
    let chunk = graph
        .node(EntityKind::Chunk, &NodeKey::chunk("d1", "0"))
        .await
        .unwrap();
    assert_eq!(text(&chunk, "space_id"), Some("space_123"));
}

#[tokio::test]
async fn test_has_space_from_wrong_organization_is_counted() {
    let graph = legacy_graph().await;
    assert!(
        graph
            .insert_edge(
                RelType::HasSpace,
                (EntityKind::Organization, &NodeKey::id("org_2")),
                (EntityKind::Space, &NodeKey::id("sp1")),
                [("created_at", "2024-03-01T00:00:00Z")],
            )
            .await
    );

    let runner = runner(graph, "mig-1");
    let before = runner.verify().await.unwrap();
    // sp1 (edge from org_2 only) and sp_orphan (no edge).
    assert_eq!(before.violations(Invariant::OrgSpacesWithoutSingleHasSpace), 2);

    let report = runner.run_all().await;
    assert!(matches!(report.state, RunState::Completed { .. }));
    assert_eq!(
        runner
            .store()
            .edge_count(RelType::HasSpace, &NodeKey::id("org_1"), &NodeKey::id("sp1"))
            .await,
        1
    );
    // The linker adds the owner's edge but never removes the foreign one.
    let audit = report.audit.unwrap();
    assert_eq!(audit.violations(Invariant::OrgSpacesWithoutSingleHasSpace), 2);
    assert!(!audit.passed);
}

#[tokio::test]
async fn test_duplicate_relationships_are_counted() {
    let graph = legacy_graph().await;
    for _ in 0..2 {
        assert!(
            graph
                .insert_edge(
                    RelType::MemberOf,
                    (EntityKind::User, &NodeKey::id("u1")),
                    (EntityKind::Organization, &NodeKey::id("org_1")),
                    [("role", "admin")],
                )
                .await
        );
    }

    let runner = runner(graph, "mig-1");
    let report = runner.run_all().await;

    let link = report.link.unwrap();
    assert_eq!(link.member_of_relationships_created, 1, "team membership only");
    assert_eq!(
        runner
            .store()
            .edge_count(RelType::MemberOf, &NodeKey::id("u1"), &NodeKey::id("org_1"))
            .await,
        2
    );

    let audit = report.audit.unwrap();
    assert_eq!(audit.violations(Invariant::DuplicateRelationships), 1);
    assert_eq!(report.state, RunState::Completed { violations: 3 });
}

/// The legacy graph plus a second org member without a role and a second team.
async fn graph_with_members() -> MemoryGraph {
    let graph = legacy_graph().await;
    insert(
        &graph,
        EntityKind::User,
        json!({"id": "u2", "personal_tenant_id": "tenant_456", "organization_id": "org_1"}),
    )
    .await;
    insert(
        &graph,
        EntityKind::Team,
        json!({"id": "t2", "member_ids": ["u1", "u2", "u_missing"]}),
    )
    .await;
    graph
}

#[tokio::test]
async fn test_organization_membership_carries_role() {
    let runner = runner(graph_with_members().await, "mig-1");
    runner.run_all().await;

    let memberships: Vec<_> = runner
        .store()
        .edges(RelType::MemberOf)
        .await
        .into_iter()
        .filter(|e| e.target == NodeKey::id("org_1"))
        .collect();
    assert_eq!(memberships.len(), 2);
    for edge in &memberships {
        let expected = if edge.source == NodeKey::id("u1") { "admin" } else { "member" };
        assert_eq!(text(&edge.props, "role"), Some(expected));
        assert_eq!(text(&edge.props, "migration_step"), Some("link_organization_members"));
    }
}

#[tokio::test]
async fn test_team_membership_points_from_user_to_team() {
    let runner = runner(graph_with_members().await, "mig-1");
    runner.run_all().await;
    let graph = runner.store();

    let mut members: Vec<_> = graph
        .edges(RelType::MemberOf)
        .await
        .into_iter()
        .filter(|e| e.target == NodeKey::id("t2"))
        .collect();
    members.sort_by(|a, b| a.source.cursor().cmp(&b.source.cursor()));
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].source, NodeKey::id("u1"));
    assert_eq!(members[1].source, NodeKey::id("u2"));
    for edge in &members {
        assert_eq!(text(&edge.props, "role"), Some("member"));
        assert_eq!(text(&edge.props, "migration_step"), Some("link_team_members"));
    }

    let teams = [NodeKey::id("t1"), NodeKey::id("t2")];
    assert!(graph
        .edges(RelType::MemberOf)
        .await
        .iter()
        .all(|e| !teams.contains(&e.source)));
    assert!(graph
        .edges(RelType::Contains)
        .await
        .iter()
        .all(|e| !teams.contains(&e.source) && !teams.contains(&e.target)));
}

#[tokio::test]
async fn test_existing_fields_are_never_overwritten() {
    let graph = MemoryGraph::new();
    insert(
        &graph,
        EntityKind::User,
        json!({"id": "u1", "personal_tenant_id": "tenant_123", "personal_space_id": "space_custom"}),
    )
    .await;
    insert(
        &graph,
        EntityKind::Notebook,
        json!({"id": "n1", "owner_id": "u1", "tenant_id": "tenant_keep"}),
    )
    .await;

    let runner = runner(graph, "mig-1");
    runner.run_all().await;
    let graph = runner.store();

    let user = graph.node(EntityKind::User, &NodeKey::id("u1")).await.unwrap();
    assert_eq!(text(&user, "personal_space_id"), Some("space_custom"));
    assert!(user.get("backfill_run").is_none());

    let notebook = graph.node(EntityKind::Notebook, &NodeKey::id("n1")).await.unwrap();
    assert_eq!(text(&notebook, "tenant_id"), Some("tenant_keep"));
    assert_eq!(text(&notebook, "space_id"), Some("space_custom"));
    assert_eq!(
        notebook.get("backfilled_fields").map(PropertyValue::string_items),
        Some(vec!["space_id".to_string(), "space_type".to_string()])
    );
}

#[tokio::test]
async fn test_rollback_removes_only_the_target_run() {
    let graph = legacy_graph().await;
    insert(
        &graph,
        EntityKind::Notebook,
        json!({"id": "n2", "space_id": "sp1"}),
    )
    .await;
    assert!(
        graph
            .insert_edge(
                RelType::BelongsTo,
                (EntityKind::Notebook, &NodeKey::id("n2")),
                (EntityKind::Space, &NodeKey::id("sp1")),
                [("created_at", "2024-03-01T00:00:00Z")],
            )
            .await
    );

    let first = runner(graph, "mig-1");
    assert!(!first.run_all().await.state.is_failed());

    let graph = first.into_store();
    insert(
        &graph,
        EntityKind::Notebook,
        json!({"id": "n3", "space_id": "sp1"}),
    )
    .await;
    let second = runner(graph, "mig-2");
    assert_eq!(second.link().await.unwrap().belongs_to_relationships_created, 1);

    let target = run_id("mig-1");
    let report = second
        .rollback(&target, Some(&confirmation_token(&target)))
        .await
        .unwrap();
    assert_eq!(report.relationships_removed[&RelType::Owns], 1);
    assert_eq!(report.relationships_removed[&RelType::BelongsTo], 1);
    assert_eq!(report.fields_reverted[&EntityKind::User], 1);
    assert_eq!(report.spaces_removed, 2);
    assert_eq!(report.spaces_retained, 0);

    let graph = second.store();
    for rel in RelType::ALL {
        assert!(graph
            .edges(rel)
            .await
            .iter()
            .all(|e| text(&e.props, "migration_run") != Some("mig-1")));
    }
    let belongs_to = graph.edges(RelType::BelongsTo).await;
    assert_eq!(belongs_to.len(), 2);
    assert!(belongs_to
        .iter()
        .any(|e| e.source == NodeKey::id("n2") && e.props.get("migrated").is_none()));
    assert!(belongs_to.iter().any(|e| {
        e.source == NodeKey::id("n3") && text(&e.props, "migration_run") == Some("mig-2")
    }));

    let user = graph.node(EntityKind::User, &NodeKey::id("u1")).await.unwrap();
    assert_eq!(text(&user, "personal_tenant_id"), Some("tenant_123"));
    assert!(user.get("personal_space_id").is_none());
    assert!(graph
        .node(EntityKind::Space, &NodeKey::id("space_123"))
        .await
        .is_none());
    assert!(graph.node(EntityKind::Space, &NodeKey::id("sp1")).await.is_some());
    assert_eq!(graph.count_run_artifacts(&target).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rollback_refuses_without_confirmation() {
    let first = runner(legacy_graph().await, "mig-1");
    first.run_all().await;
    let before = first.store().snapshot().await;
    let target = run_id("mig-1");

    let err = first.rollback(&target, None).await.unwrap_err();
    assert!(matches!(err, MigrateError::RollbackRefused { .. }));
    let err = first
        .rollback(&target, Some("ROLLBACK mig-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::RollbackRefused { .. }));

    let unknown = run_id("mig-404");
    let err = first
        .rollback(&unknown, Some(&confirmation_token(&unknown)))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::UnknownRun(ref id) if id == "mig-404"));

    assert_eq!(first.store().snapshot().await, before);
}

#[tokio::test]
async fn test_verify_is_read_only_and_repeatable() {
    let runner = runner(legacy_graph().await, "mig-1");
    let before = runner.store().snapshot().await;

    let first = runner.verify().await.unwrap();
    let second = runner.verify().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(runner.store().snapshot().await, before);

    assert_eq!(first.checks.len(), Invariant::ALL.len());
    assert_eq!(first.violations(Invariant::UsersWithoutOwnsRelationship), 0);
    assert_eq!(first.violations(Invariant::OrganizationsWithoutSpace), 2);
    assert!(first.checks.contains_key("orphaned_notebooks"));
}

#[tokio::test]
async fn test_schema_failure_does_not_stop_remaining_statements() {
    let graph = MemoryGraph::new();
    graph.fail_schema("chunk_file_id").await;
    let runner = runner(graph, "mig-1");

    let outcome = runner.apply_schema().await.unwrap();
    assert_eq!(outcome.applied.len(), SCHEMA_STATEMENTS.len() - 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].name, "chunk_file_id");
    assert_eq!(
        outcome.failed[0].error,
        "Statement rejected by the store: schema statement chunk_file_id rejected"
    );

    let applied = runner.store().applied_schema().await;
    assert!(!applied.contains(&"chunk_file_id".to_string()));
    assert!(applied.contains(&"contains_migration_run".to_string()));

    let again = runner.apply_schema().await.unwrap();
    assert_eq!(again.applied, outcome.applied);
}

#[tokio::test]
async fn test_rejected_record_is_skipped_and_counted() {
    let graph = MemoryGraph::new();
    for id in ["u1", "u2", "u3"] {
        insert(&graph, EntityKind::User, json!({ "id": id })).await;
    }
    graph.fail_record("u2").await;

    let runner = runner(graph, "mig-1");
    let report = runner.backfill(Some(EntityKind::User)).await.unwrap();
    assert_eq!(report.entities.len(), 1);
    let users = report.entity(EntityKind::User).unwrap();
    assert_eq!(users.examined, 3);
    assert_eq!(users.updated, 2);
    assert_eq!(users.failed, 1);

    let graph = runner.store();
    assert_eq!(
        graph.property(EntityKind::User, "u3", "personal_space_id").await,
        Some("space_u3".into())
    );
    assert!(graph
        .property(EntityKind::User, "u2", "personal_space_id")
        .await
        .is_none());
}

#[tokio::test]
async fn test_slow_record_times_out_as_skip() {
    let graph = MemoryGraph::new();
    insert(&graph, EntityKind::Organization, json!({"id": "org_slow"})).await;
    insert(&graph, EntityKind::Organization, json!({"id": "org_fast"})).await;
    graph
        .delay_record("org_slow", std::time::Duration::from_millis(1500))
        .await;

    let config = MigrateConfig {
        query_timeout_secs: 1,
        ..config()
    };
    let runner = MigrationRunner::new(graph, run_id("mig-1"), config).without_journal();
    let report = runner
        .backfill(Some(EntityKind::Organization))
        .await
        .unwrap();
    let orgs = report.entity(EntityKind::Organization).unwrap();
    assert_eq!(orgs.updated, 1);
    assert_eq!(orgs.failed, 1);
}

#[tokio::test]
async fn test_store_outage_fails_the_run() {
    let graph = legacy_graph().await;
    graph.set_offline(true).await;
    let runner = runner(graph, "mig-1");

    assert!(runner.verify_connectivity().await.is_err());

    let report = runner.run_all().await;
    match &report.state {
        RunState::Failed { stage, reason } => {
            assert_eq!(stage, "schema");
            assert!(reason.contains("offline"));
        }
        other => panic!("expected failed run, got {other:?}"),
    }
    assert!(report.schema.is_none());
    assert!(report.finished_at.is_some());

    match runner.backfill(None).await {
        Err(MigrateError::Graph(e)) => assert!(e.is_systemic()),
        other => panic!("expected systemic graph error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_derived_space_collision_is_skipped() {
    let graph = MemoryGraph::new();
    insert(&graph, EntityKind::User, json!({"id": "u-1"})).await;
    insert(&graph, EntityKind::User, json!({"id": "u1"})).await;

    let runner = runner(graph, "mig-1");
    let report = runner.backfill(Some(EntityKind::User)).await.unwrap();
    let users = report.entity(EntityKind::User).unwrap();
    assert_eq!(users.updated, 1);
    assert_eq!(users.collisions, Some(1));
    assert_eq!(users.skipped, 1);
    assert!(runner
        .store()
        .property(EntityKind::User, "u1", "personal_space_id")
        .await
        .is_none());

    let graph = MemoryGraph::new();
    insert(&graph, EntityKind::User, json!({"id": "u-1"})).await;
    insert(&graph, EntityKind::User, json!({"id": "u1"})).await;
    let config = MigrateConfig {
        identifier_scheme: SchemeKind::Hashed,
        ..config()
    };
    let hashed = MigrationRunner::new(graph, run_id("mig-1"), config).without_journal();
    let report = hashed.backfill(Some(EntityKind::User)).await.unwrap();
    assert_eq!(report.scheme, "hashed");
    assert_eq!(report.entity(EntityKind::User).unwrap().updated, 2);
}

#[tokio::test]
async fn test_run_is_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MigrationRunner::new(legacy_graph().await, run_id("mig-7"), config())
        .with_journal_dir(dir.path());
    runner.run_all().await;

    let journal = FileJournalStore::new(dir.path())
        .unwrap()
        .get("mig-7", "run")
        .unwrap();
    let steps: Vec<_> = journal.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(steps, ["schema", "backfill", "link", "verify"]);
    assert!(journal.verify_integrity());
    // Orphan space leaves the audit with violations.
    assert!(!journal.steps[3].success);
}
