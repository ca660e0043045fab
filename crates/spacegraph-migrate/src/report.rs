//! Run state machine and the per-run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spacegraph_core::RunId;

use crate::audit::AuditReport;
use crate::backfill::BackfillReport;
use crate::error::{MigrateError, Result};
use crate::linker::LinkReport;
use crate::rollback::RollbackReport;
use crate::schema::SchemaOutcome;

/// Where a full migration run stands.
///
/// `Verified` with violations is not a failure: the run still completes and
/// the counts motivate a re-run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    SchemaApplied,
    Backfilled,
    Linked,
    Verified { violations: u64 },
    Completed { violations: u64 },
    Failed { stage: String, reason: String },
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SchemaApplied => "schema_applied",
            Self::Backfilled => "backfilled",
            Self::Linked => "linked",
            Self::Verified { .. } => "verified",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// The step that runs next from this state.
    pub fn next_stage(&self) -> &'static str {
        match self {
            Self::Pending => "schema",
            Self::SchemaApplied => "backfill",
            Self::Backfilled => "link",
            Self::Linked => "verify",
            Self::Verified { .. } => "complete",
            Self::Completed { .. } | Self::Failed { .. } => "none",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Validate a transition. `Failed` is reachable from any non-terminal state.
    pub fn advance(&self, next: RunState) -> Result<RunState> {
        let allowed = match (self, &next) {
            (from, Self::Failed { .. }) => !from.is_terminal(),
            (Self::Pending, Self::SchemaApplied)
            | (Self::SchemaApplied, Self::Backfilled)
            | (Self::Backfilled, Self::Linked)
            | (Self::Linked, Self::Verified { .. })
            | (Self::Verified { .. }, Self::Completed { .. }) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(MigrateError::InvalidTransition {
                from: self.name().to_string(),
                to: next.name().to_string(),
            })
        }
    }
}

/// Accumulated result of `run`: every step's report plus the final state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: RunState,
    pub schema: Option<SchemaOutcome>,
    pub backfill: Option<BackfillReport>,
    pub link: Option<LinkReport>,
    pub audit: Option<AuditReport>,
}

impl MigrationReport {
    pub fn new(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            state: RunState::Pending,
            schema: None,
            backfill: None,
            link: None,
            audit: None,
        }
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        self.state = self.state.advance(next)?;
        tracing::info!(run_id = %self.run_id, state = self.state.name(), "Run state advanced");
        Ok(())
    }
}

/// A step result that can be summarized in one line and journaled.
pub trait StepReport: Serialize {
    fn summary(&self) -> String;

    /// Whether the step finished without per-record failures or violations.
    fn clean(&self) -> bool;
}

impl StepReport for SchemaOutcome {
    fn summary(&self) -> String {
        SchemaOutcome::summary(self)
    }

    fn clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl StepReport for BackfillReport {
    fn summary(&self) -> String {
        BackfillReport::summary(self)
    }

    fn clean(&self) -> bool {
        self.total_failed() == 0
    }
}

impl StepReport for LinkReport {
    fn summary(&self) -> String {
        LinkReport::summary(self)
    }

    fn clean(&self) -> bool {
        self.failed == 0
    }
}

impl StepReport for AuditReport {
    fn summary(&self) -> String {
        AuditReport::summary(self)
    }

    fn clean(&self) -> bool {
        self.passed
    }
}

impl StepReport for RollbackReport {
    fn summary(&self) -> String {
        RollbackReport::summary(self)
    }

    fn clean(&self) -> bool {
        true
    }
}
