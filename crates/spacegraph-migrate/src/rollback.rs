//! Rollback Executor: remove exactly what one migration run created.
//!
//! Only edges, fields, and Spaces carrying the run's provenance tags are
//! touched. Organic relationships with the same shape are left alone.

use std::collections::BTreeMap;

use serde::Serialize;
use spacegraph_core::{EntityKind, RelType, RunId};
use spacegraph_graph::GraphStore;

use crate::error::{MigrateError, Result};
use crate::step::StepContext;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RollbackReport {
    pub run_id: String,
    pub relationships_removed: BTreeMap<RelType, u64>,
    pub fields_reverted: BTreeMap<EntityKind, u64>,
    pub spaces_removed: u64,
    /// Spaces the run created that are still referenced.
    pub spaces_retained: u64,
}

impl RollbackReport {
    pub fn total_removed(&self) -> u64 {
        self.relationships_removed.values().sum::<u64>()
            + self.fields_reverted.values().sum::<u64>()
            + self.spaces_removed
    }

    pub fn summary(&self) -> String {
        format!(
            "{} relationships removed, {} records reverted, {} spaces removed, {} retained",
            self.relationships_removed.values().sum::<u64>(),
            self.fields_reverted.values().sum::<u64>(),
            self.spaces_removed,
            self.spaces_retained
        )
    }
}

/// The literal an operator must supply to roll back `run_id`.
pub fn confirmation_token(run_id: &RunId) -> String {
    format!("ROLLBACK {run_id}")
}

/// Refuse unless `confirmation` is exactly the run's token.
pub fn check_confirmation(run_id: &RunId, confirmation: Option<&str>) -> Result<()> {
    let expected = confirmation_token(run_id);
    match confirmation {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(MigrateError::RollbackRefused {
            reason: format!("confirmation does not match, expected {expected:?}"),
        }),
        None => Err(MigrateError::RollbackRefused {
            reason: format!("no confirmation supplied, pass --confirm {expected:?}"),
        }),
    }
}

/// Roll back the run named by `ctx.run_id`.
pub async fn rollback<S: GraphStore>(
    ctx: StepContext<'_, S>,
    confirmation: Option<&str>,
) -> Result<RollbackReport> {
    check_confirmation(ctx.run_id, confirmation)?;

    let artifacts = ctx.read(ctx.store.count_run_artifacts(ctx.run_id)).await?;
    if artifacts == 0 {
        return Err(MigrateError::UnknownRun(ctx.run_id.to_string()));
    }
    tracing::info!(run_id = %ctx.run_id, artifacts, "Rolling back migration run");

    let mut relationships_removed = BTreeMap::new();
    for rel in RelType::ALL {
        let removed = ctx
            .read(ctx.store.remove_run_relationships(rel, ctx.run_id))
            .await?;
        tracing::info!(run_id = %ctx.run_id, rel = %rel, removed, "Relationships removed");
        relationships_removed.insert(rel, removed);
    }

    let mut fields_reverted = BTreeMap::new();
    for kind in EntityKind::BACKFILL_ORDER {
        let reverted = ctx.read(ctx.store.revert_run_fields(kind, ctx.run_id)).await?;
        tracing::info!(
            run_id = %ctx.run_id,
            entity = %kind,
            reverted,
            "Backfilled fields reverted"
        );
        fields_reverted.insert(kind, reverted);
    }

    let spaces = ctx.read(ctx.store.remove_run_spaces(ctx.run_id)).await?;
    if spaces.retained > 0 {
        tracing::warn!(
            run_id = %ctx.run_id,
            retained = spaces.retained,
            "Spaces created by this run are still referenced and were kept"
        );
    }

    Ok(RollbackReport {
        run_id: ctx.run_id.to_string(),
        relationships_removed,
        fields_reverted,
        spaces_removed: spaces.removed,
        spaces_retained: spaces.retained,
    })
}
