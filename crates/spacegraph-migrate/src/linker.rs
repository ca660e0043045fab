//! Relationship Linker: turn scalar foreign keys into provenance-tagged edges.
//!
//! Every edge is created through an existence-guarded write, so re-running
//! the linker never produces a second edge between the same pair.

use serde::Serialize;
use spacegraph_core::ids::default_space_id;
use spacegraph_core::{IdentifierScheme, LegacyIdentity, LinkKind, OrphanSpace, RelType};
use spacegraph_graph::store::{DefaultSpaceCreate, LinkParams, Page, Provenance};
use spacegraph_graph::GraphStore;

use crate::error::Result;
use crate::step::StepContext;

const DEFAULT_SPACE_STEP: &str = "create_default_spaces";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LinkReport {
    pub run_id: String,
    pub owns_relationships_created: u64,
    pub has_space_relationships_created: u64,
    pub default_spaces_created: u64,
    pub belongs_to_relationships_created: u64,
    pub member_of_relationships_created: u64,
    pub contains_relationships_created: u64,
    pub failed: u64,
    /// Organization spaces whose owner does not exist; left unlinked for manual review.
    pub orphan_spaces: Vec<OrphanSpace>,
}

impl LinkReport {
    fn tally(&mut self, rel: RelType, created: u64) {
        let counter = match rel {
            RelType::Owns => &mut self.owns_relationships_created,
            RelType::HasSpace => &mut self.has_space_relationships_created,
            RelType::BelongsTo => &mut self.belongs_to_relationships_created,
            RelType::MemberOf => &mut self.member_of_relationships_created,
            RelType::Contains => &mut self.contains_relationships_created,
        };
        *counter += created;
    }

    /// Edges and default spaces created by this run.
    pub fn total_created(&self) -> u64 {
        self.owns_relationships_created
            + self.has_space_relationships_created
            + self.default_spaces_created
            + self.belongs_to_relationships_created
            + self.member_of_relationships_created
            + self.contains_relationships_created
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} failed, {} orphan spaces",
            self.total_created(),
            self.failed,
            self.orphan_spaces.len()
        )
    }
}

/// Run every link kind in order, synthesizing default spaces right after
/// `HAS_SPACE` so they are only created for organizations still without one.
pub async fn link<S: GraphStore>(
    ctx: StepContext<'_, S>,
    scheme: &dyn IdentifierScheme,
    default_space_name: &str,
) -> Result<LinkReport> {
    let mut report = LinkReport {
        run_id: ctx.run_id.to_string(),
        ..Default::default()
    };

    for kind in LinkKind::ALL {
        let created = link_kind(ctx, kind, &mut report.failed).await?;
        tracing::info!(run_id = %ctx.run_id, step = kind.step(), created, "Link step complete");
        report.tally(kind.rel(), created);

        if kind == LinkKind::HasSpace {
            report.default_spaces_created =
                create_default_spaces(ctx, scheme, default_space_name, &mut report.failed).await?;
            tracing::info!(
                run_id = %ctx.run_id,
                step = DEFAULT_SPACE_STEP,
                created = report.default_spaces_created,
                "Link step complete"
            );
        }
    }

    report.orphan_spaces = ctx.read(ctx.store.orphan_spaces()).await?;
    for orphan in &report.orphan_spaces {
        tracing::warn!(
            space_id = %orphan.space_id,
            claimed_owner_id = %orphan.claimed_owner_id,
            "Organization space has no owner, left unlinked"
        );
    }

    Ok(report)
}

async fn link_kind<S: GraphStore>(
    ctx: StepContext<'_, S>,
    kind: LinkKind,
    failed: &mut u64,
) -> Result<u64> {
    let mut created = 0;
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let candidates = ctx.read(ctx.store.link_candidates(kind, &page)).await?;
        let Some(last) = candidates.last() else {
            break;
        };
        let next = page.next(last.cursor.as_str());

        for candidate in &candidates {
            let params = LinkParams {
                source: candidate.source.clone(),
                target: candidate.target.clone(),
                role: candidate.role.clone(),
                provenance: Provenance::new(ctx.run_id, kind.step()),
            };
            match ctx
                .item(kind.step(), &candidate.cursor, ctx.store.link(kind, &params))
                .await?
            {
                Some(true) => created += 1,
                Some(false) => {}
                None => *failed += 1,
            }
            ctx.throttle().await;
        }
        page = next;
    }

    Ok(created)
}

async fn create_default_spaces<S: GraphStore>(
    ctx: StepContext<'_, S>,
    scheme: &dyn IdentifierScheme,
    name: &str,
    failed: &mut u64,
) -> Result<u64> {
    let mut created = 0;
    let mut page = Page::first(ctx.options.batch_size);

    loop {
        let organizations = ctx
            .read(ctx.store.organizations_without_space(&page))
            .await?;
        let Some(last) = organizations.last() else {
            break;
        };
        let next = page.next(last.id.as_str());

        for org in &organizations {
            let tenant_id = match org.tenant_id.clone().filter(|t| !t.is_empty()) {
                Some(tenant) => tenant,
                None => {
                    let identity = LegacyIdentity {
                        raw_id: &org.id,
                        legacy_tenant_id: None,
                    };
                    match scheme.derive(&identity) {
                        Ok(ids) => ids.tenant_id,
                        Err(e) => {
                            tracing::warn!(
                                step = DEFAULT_SPACE_STEP,
                                key = %org.id,
                                error = %e,
                                "Cannot derive tenant for default space"
                            );
                            *failed += 1;
                            continue;
                        }
                    }
                }
            };

            let params = DefaultSpaceCreate {
                organization_id: org.id.clone(),
                space_id: default_space_id(&org.id),
                tenant_id,
                name: name.to_string(),
                provenance: Provenance::new(ctx.run_id, DEFAULT_SPACE_STEP),
            };
            match ctx
                .item(
                    DEFAULT_SPACE_STEP,
                    &org.id,
                    ctx.store.create_default_space(&params),
                )
                .await?
            {
                Some(true) => created += 1,
                Some(false) => {}
                None => *failed += 1,
            }
            ctx.throttle().await;
        }
        page = next;
    }

    Ok(created)
}
