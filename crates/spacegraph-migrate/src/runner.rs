//! Migration runner: executes steps in dependency order against one store.
//!
//! Each public command opens its own journal session. `run_all` walks the
//! full state machine and never returns an error; a systemic failure ends
//! the run in `Failed` with the stage and cause recorded.

use std::path::PathBuf;

use chrono::Utc;
use spacegraph_core::{EntityKind, IdentifierScheme, RunId};
use spacegraph_graph::GraphStore;
use spacegraph_journal::JournalSession;

use crate::audit::{self, AuditReport};
use crate::backfill::{self, BackfillReport};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::journal;
use crate::linker::{self, LinkReport};
use crate::report::{MigrationReport, RunState, StepReport};
use crate::rollback::{self, RollbackReport};
use crate::schema::{self, SchemaOutcome};
use crate::step::StepContext;

pub struct MigrationRunner<S> {
    store: S,
    run_id: RunId,
    config: MigrateConfig,
    scheme: Box<dyn IdentifierScheme>,
    journal_dir: Option<PathBuf>,
}

impl<S: GraphStore> MigrationRunner<S> {
    pub fn new(store: S, run_id: RunId, config: MigrateConfig) -> Self {
        let scheme = config.identifier_scheme.scheme();
        let journal_dir = Some(PathBuf::from(&config.journal_dir));
        Self {
            store,
            run_id,
            config,
            scheme,
            journal_dir,
        }
    }

    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    pub fn without_journal(mut self) -> Self {
        self.journal_dir = None;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn context<'a>(&'a self, run_id: &'a RunId) -> StepContext<'a, S> {
        StepContext::new(&self.store, run_id, self.config.step_options())
    }

    /// Round-trip the store; any failure here is fatal.
    pub async fn verify_connectivity(&self) -> Result<()> {
        self.context(&self.run_id)
            .read(self.store.verify_connectivity())
            .await?;
        Ok(())
    }

    pub async fn apply_schema(&self) -> Result<SchemaOutcome> {
        let outcome = schema::apply_schema(self.context(&self.run_id)).await;
        self.journal_single("schema", &self.run_id, &outcome);
        outcome
    }

    pub async fn backfill(&self, only: Option<EntityKind>) -> Result<BackfillReport> {
        let outcome =
            backfill::backfill(self.context(&self.run_id), self.scheme.as_ref(), only).await;
        self.journal_single("backfill", &self.run_id, &outcome);
        outcome
    }

    pub async fn link(&self) -> Result<LinkReport> {
        let outcome = self.link_step().await;
        self.journal_single("link", &self.run_id, &outcome);
        outcome
    }

    pub async fn verify(&self) -> Result<AuditReport> {
        let outcome = audit::verify(self.context(&self.run_id)).await;
        self.journal_single("verify", &self.run_id, &outcome);
        outcome
    }

    /// Remove everything run `target` created. Refused without the exact
    /// confirmation token or when nothing carries the run's tags.
    pub async fn rollback(
        &self,
        target: &RunId,
        confirmation: Option<&str>,
    ) -> Result<RollbackReport> {
        let outcome = rollback::rollback(self.context(target), confirmation).await;
        self.journal_single("rollback", target, &outcome);
        outcome
    }

    /// Schema, backfill, link, verify, in order.
    pub async fn run_all(&self) -> MigrationReport {
        let mut report = MigrationReport::new(&self.run_id);
        let mut session = JournalSession::new(self.run_id.as_str(), "run");
        tracing::info!(run_id = %self.run_id, scheme = self.scheme.name(), "Migration run started");

        if let Err(e) = self.drive(&mut report, &mut session).await {
            let stage = report.state.next_stage();
            tracing::error!(run_id = %self.run_id, stage, error = %e, "Migration run failed");
            journal::record_failure(&mut session, stage, &e);
            report.state = RunState::Failed {
                stage: stage.to_string(),
                reason: e.to_string(),
            };
        }

        report.finished_at = Some(Utc::now());
        self.store_journal(session);
        tracing::info!(
            run_id = %self.run_id,
            state = report.state.name(),
            "Migration run finished"
        );
        report
    }

    async fn drive(
        &self,
        report: &mut MigrationReport,
        session: &mut JournalSession,
    ) -> Result<()> {
        let ctx = self.context(&self.run_id);

        let outcome = schema::apply_schema(ctx).await?;
        journal::record_step(session, "schema", &outcome);
        report.schema = Some(outcome);
        report.advance(RunState::SchemaApplied)?;

        let backfilled = backfill::backfill(ctx, self.scheme.as_ref(), None).await?;
        journal::record_step(session, "backfill", &backfilled);
        report.backfill = Some(backfilled);
        report.advance(RunState::Backfilled)?;

        let linked = self.link_step().await?;
        journal::record_step(session, "link", &linked);
        report.link = Some(linked);
        report.advance(RunState::Linked)?;

        let audited = audit::verify(ctx).await?;
        journal::record_step(session, "verify", &audited);
        let violations = audited.total_violations;
        report.audit = Some(audited);
        report.advance(RunState::Verified { violations })?;

        if violations > 0 {
            tracing::warn!(
                run_id = %self.run_id,
                violations,
                "Run completed with invariant violations; re-run to converge"
            );
        }
        report.advance(RunState::Completed { violations })
    }

    async fn link_step(&self) -> Result<LinkReport> {
        linker::link(
            self.context(&self.run_id),
            self.scheme.as_ref(),
            &self.config.default_space_name,
        )
        .await
    }

    fn journal_single<T: StepReport>(&self, command: &str, run_id: &RunId, outcome: &Result<T>) {
        let mut session = JournalSession::new(run_id.as_str(), command);
        match outcome {
            Ok(report) => {
                tracing::info!(
                    run_id = %run_id,
                    command,
                    summary = %report.summary(),
                    "Step finished"
                );
                journal::record_step(&mut session, command, report);
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, command, error = %e, "Step failed");
                journal::record_failure(&mut session, command, e);
            }
        }
        self.store_journal(session);
    }

    fn store_journal(&self, session: JournalSession) {
        if let Some(dir) = &self.journal_dir {
            journal::finalize_and_store(session, dir);
        }
    }
}
