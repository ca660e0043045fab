//! Integrity Auditor: read-only invariant counts.

use std::collections::BTreeMap;

use serde::Serialize;
use spacegraph_core::{Invariant, OrphanSpace};
use spacegraph_graph::GraphReader;

use crate::error::Result;
use crate::step::StepContext;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditReport {
    /// Violation count per invariant, keyed by its column name.
    pub checks: BTreeMap<String, u64>,
    pub orphan_spaces: Vec<OrphanSpace>,
    pub total_violations: u64,
    pub passed: bool,
}

impl AuditReport {
    pub fn violations(&self, invariant: Invariant) -> u64 {
        self.checks.get(invariant.column()).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let failing = self.checks.values().filter(|&&n| n > 0).count();
        format!(
            "{} violations across {failing} of {} checks",
            self.total_violations,
            self.checks.len()
        )
    }
}

/// Run every invariant query. Never writes.
pub async fn verify<S: GraphReader>(ctx: StepContext<'_, S>) -> Result<AuditReport> {
    let mut checks = BTreeMap::new();
    for invariant in Invariant::ALL {
        let count = ctx.read(ctx.store.count_violations(invariant)).await?;
        if count > 0 {
            tracing::warn!(check = invariant.column(), violations = count, "Invariant violated");
        }
        checks.insert(invariant.column().to_string(), count);
    }
    let orphan_spaces = ctx.read(ctx.store.orphan_spaces()).await?;

    let total_violations = checks.values().sum();
    tracing::info!(total_violations, orphan_spaces = orphan_spaces.len(), "Audit complete");
    Ok(AuditReport {
        checks,
        orphan_spaces,
        total_violations,
        passed: total_violations == 0,
    })
}
