//! Backfill Engine: fill missing canonical tenant/space fields.
//!
//! Entity types run in dependency order (Users, Organizations, Spaces,
//! Notebooks, Documents, Chunks) so each level can inherit from the one
//! before it. Selection is keyset-paginated; every write is guarded by the
//! store so an already-populated field is never touched.

use serde::Serialize;
use spacegraph_core::ids::tenant_for_space;
use spacegraph_core::{EntityKind, IdentifierScheme, LegacyIdentity, Scope, ScopeKind};
use spacegraph_graph::store::{
    FieldStamp, OrganizationBackfill, Page, PersonalSpaceCreate, Provenance, ScopeBackfill,
    ScopeSeed, SpaceClaim, UserBackfill,
};
use spacegraph_graph::GraphStore;

use crate::error::Result;
use crate::step::StepContext;

/// Counters for one entity type.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntityBackfill {
    pub entity: EntityKind,
    pub examined: u64,
    pub updated: u64,
    /// Insufficient source data, identifier collision, or already filled at write time.
    pub skipped: u64,
    /// Per-record write failures and timeouts.
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collisions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_spaces_created: Option<u64>,
}

impl EntityBackfill {
    fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            examined: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            collisions: (entity == EntityKind::User).then_some(0),
            personal_spaces_created: (entity == EntityKind::Space).then_some(0),
        }
    }

    /// Tally the outcome of one guarded write.
    fn record(&mut self, outcome: Option<bool>) {
        match outcome {
            Some(true) => self.updated += 1,
            Some(false) => self.skipped += 1,
            None => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub run_id: String,
    pub scheme: String,
    pub entities: Vec<EntityBackfill>,
}

impl BackfillReport {
    pub fn entity(&self, kind: EntityKind) -> Option<&EntityBackfill> {
        self.entities.iter().find(|e| e.entity == kind)
    }

    /// Records changed by this backfill, including created personal spaces.
    pub fn total_updated(&self) -> u64 {
        self.entities
            .iter()
            .map(|e| e.updated + e.personal_spaces_created.unwrap_or(0))
            .sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.entities.iter().map(|e| e.failed).sum()
    }

    pub fn summary(&self) -> String {
        let skipped: u64 = self.entities.iter().map(|e| e.skipped).sum();
        format!(
            "{} updated, {} skipped, {} failed across {} entity types",
            self.total_updated(),
            skipped,
            self.total_failed(),
            self.entities.len()
        )
    }
}

/// Backfill every entity type in order, or just `only`.
pub async fn backfill<S: GraphStore>(
    ctx: StepContext<'_, S>,
    scheme: &dyn IdentifierScheme,
    only: Option<EntityKind>,
) -> Result<BackfillReport> {
    let mut report = BackfillReport {
        run_id: ctx.run_id.to_string(),
        scheme: scheme.name().to_string(),
        entities: Vec::new(),
    };

    if only == Some(EntityKind::Team) {
        tracing::info!("Teams carry no canonical fields, nothing to backfill");
        return Ok(report);
    }

    for kind in EntityKind::BACKFILL_ORDER {
        if only.is_some_and(|o| o != kind) {
            continue;
        }
        let counts = match kind {
            EntityKind::User => backfill_users(ctx, scheme).await?,
            EntityKind::Organization => backfill_organizations(ctx, scheme).await?,
            EntityKind::Space => backfill_spaces(ctx).await?,
            EntityKind::Notebook => backfill_scopes(ctx, ScopeKind::Notebook).await?,
            EntityKind::Document => backfill_scopes(ctx, ScopeKind::Document).await?,
            EntityKind::Chunk => backfill_scopes(ctx, ScopeKind::Chunk).await?,
            EntityKind::Team => continue,
        };

        tracing::info!(
            run_id = %ctx.run_id,
            entity = %kind,
            examined = counts.examined,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            "Backfill complete for entity type"
        );
        report.entities.push(counts);
    }

    Ok(report)
}

async fn backfill_users<S: GraphStore>(
    ctx: StepContext<'_, S>,
    scheme: &dyn IdentifierScheme,
) -> Result<EntityBackfill> {
    const STEP: &str = "backfill_users";
    let mut counts = EntityBackfill::new(EntityKind::User);
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let seeds = ctx
            .read(ctx.store.users_missing_personal_space(&page))
            .await?;
        let Some(last) = seeds.last() else {
            break;
        };
        let next = page.next(last.id.as_str());

        for seed in &seeds {
            counts.examined += 1;
            let identity = LegacyIdentity {
                raw_id: &seed.id,
                legacy_tenant_id: seed.legacy_tenant_id.as_deref(),
            };
            let ids = match scheme.derive(&identity) {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(
                        step = STEP,
                        key = %seed.id,
                        error = %e,
                        "Cannot derive identifiers, skipping"
                    );
                    counts.skipped += 1;
                    continue;
                }
            };

            let claim = SpaceClaim {
                space_id: ids.space_id.clone(),
                user_id: seed.id.clone(),
            };
            match ctx
                .item(STEP, &seed.id, ctx.store.personal_space_claimed(&claim))
                .await?
            {
                Some(false) => {}
                Some(true) => {
                    tracing::warn!(
                        step = STEP,
                        key = %seed.id,
                        space_id = %ids.space_id,
                        "Derived personal space id already claimed, skipping"
                    );
                    counts.skipped += 1;
                    if let Some(c) = counts.collisions.as_mut() {
                        *c += 1;
                    }
                    continue;
                }
                None => {
                    counts.failed += 1;
                    continue;
                }
            }

            let params = UserBackfill {
                user_id: seed.id.clone(),
                tenant_id: ids.tenant_id,
                space_id: ids.space_id,
                stamp: FieldStamp::new(ctx.run_id),
            };
            counts.record(ctx.item(STEP, &seed.id, ctx.store.backfill_user(&params)).await?);
            ctx.throttle().await;
        }
        page = next;
    }

    Ok(counts)
}

async fn backfill_organizations<S: GraphStore>(
    ctx: StepContext<'_, S>,
    scheme: &dyn IdentifierScheme,
) -> Result<EntityBackfill> {
    const STEP: &str = "backfill_organizations";
    let mut counts = EntityBackfill::new(EntityKind::Organization);
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let seeds = ctx
            .read(ctx.store.organizations_missing_tenant(&page))
            .await?;
        let Some(last) = seeds.last() else {
            break;
        };
        let next = page.next(last.id.as_str());

        for seed in &seeds {
            counts.examined += 1;
            let identity = LegacyIdentity {
                raw_id: &seed.id,
                legacy_tenant_id: None,
            };
            let tenant_id = match scheme.derive(&identity) {
                Ok(ids) => ids.tenant_id,
                Err(e) => {
                    tracing::warn!(
                        step = STEP,
                        key = %seed.id,
                        error = %e,
                        "Cannot derive tenant, skipping"
                    );
                    counts.skipped += 1;
                    continue;
                }
            };

            let params = OrganizationBackfill {
                organization_id: seed.id.clone(),
                tenant_id,
                stamp: FieldStamp::new(ctx.run_id),
            };
            counts.record(
                ctx.item(STEP, &seed.id, ctx.store.backfill_organization(&params))
                    .await?,
            );
            ctx.throttle().await;
        }
        page = next;
    }

    Ok(counts)
}

/// Create missing personal spaces, then fill Space tenants from their owners.
async fn backfill_spaces<S: GraphStore>(ctx: StepContext<'_, S>) -> Result<EntityBackfill> {
    const STEP: &str = "create_personal_spaces";
    let mut counts = EntityBackfill::new(EntityKind::Space);
    let mut created = 0;
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let seeds = ctx.read(ctx.store.personal_spaces_missing(&page)).await?;
        let Some(last) = seeds.last() else {
            break;
        };
        let next = page.next(last.user_id.as_str());

        for seed in &seeds {
            let tenant_id = seed
                .tenant_id
                .clone()
                .filter(|t| !t.is_empty())
                .or_else(|| tenant_for_space(&seed.space_id));
            let Some(tenant_id) = tenant_id else {
                tracing::warn!(
                    step = STEP,
                    key = %seed.user_id,
                    space_id = %seed.space_id,
                    "No tenant for personal space, skipping"
                );
                counts.skipped += 1;
                continue;
            };

            let params = PersonalSpaceCreate {
                user_id: seed.user_id.clone(),
                space_id: seed.space_id.clone(),
                tenant_id,
                provenance: Provenance::new(ctx.run_id, STEP),
            };
            match ctx
                .item(STEP, &seed.user_id, ctx.store.create_personal_space(&params))
                .await?
            {
                Some(true) => created += 1,
                Some(false) => {}
                None => counts.failed += 1,
            }
            ctx.throttle().await;
        }
        page = next;
    }

    let scoped = backfill_scopes(ctx, ScopeKind::Space).await?;
    counts.examined += scoped.examined;
    counts.updated += scoped.updated;
    counts.skipped += scoped.skipped;
    counts.failed += scoped.failed;
    counts.personal_spaces_created = Some(created);
    Ok(counts)
}

/// Fill tenant/space fields on a scoped entity type from its parent.
async fn backfill_scopes<S: GraphStore>(
    ctx: StepContext<'_, S>,
    kind: ScopeKind,
) -> Result<EntityBackfill> {
    let entity = kind.entity();
    let step = step_name(kind);
    let mut counts = EntityBackfill::new(entity);
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let seeds = ctx.read(ctx.store.scopes_missing(kind, &page)).await?;
        let Some(last) = seeds.last() else {
            break;
        };
        let next = page.next(last.key.cursor());

        for seed in &seeds {
            counts.examined += 1;
            let key = seed.key.cursor();
            let Some(scope) = resolve_scope(kind, seed) else {
                tracing::warn!(step, entity = %entity, key = %key, "No resolvable scope, skipping");
                counts.skipped += 1;
                continue;
            };

            let params = ScopeBackfill {
                key: seed.key.clone(),
                scope,
                stamp: FieldStamp::new(ctx.run_id),
            };
            counts.record(
                ctx.item(step, &key, ctx.store.backfill_scope(kind, &params))
                    .await?,
            );
            ctx.throttle().await;
        }
        page = next;
    }

    Ok(counts)
}

fn step_name(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Space => "backfill_spaces",
        ScopeKind::Notebook => "backfill_notebooks",
        ScopeKind::Document => "backfill_documents",
        ScopeKind::Chunk => "backfill_chunks",
    }
}

/// The scope a seed should inherit, if its sources allow one.
///
/// A Notebook that declares a `space_id` only inherits from that Space; the
/// owner's personal scope is used only when nothing is declared.
pub fn resolve_scope(kind: ScopeKind, seed: &ScopeSeed) -> Option<Scope> {
    match kind {
        ScopeKind::Space => seed.owner.clone(),
        ScopeKind::Notebook => {
            let declares_space = seed.space_id.as_deref().is_some_and(|s| !s.is_empty());
            if declares_space {
                seed.declared.clone()
            } else {
                seed.owner.clone()
            }
        }
        ScopeKind::Document | ScopeKind::Chunk => seed.declared.clone(),
    }
}
