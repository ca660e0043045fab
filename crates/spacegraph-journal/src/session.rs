//! Incremental journal recorder for a runner invocation.
//!
//! ```no_run
//! # use spacegraph_journal::JournalSession;
//! let mut session = JournalSession::new("mig-20261017120000", "run");
//! session.add_step("schema", "12 applied, 0 failed", serde_json::json!({"applied": 12}), true);
//! let journal = session.finalize().unwrap();
//! assert!(journal.verify_integrity());
//! ```

use chrono::Utc;

use crate::{JournalError, RunJournal, StepEntry};

pub struct JournalSession {
    journal: RunJournal,
}

impl JournalSession {
    pub fn new(run_id: &str, command: &str) -> Self {
        Self {
            journal: RunJournal {
                run_id: run_id.to_string(),
                command: command.to_string(),
                started_at: Utc::now(),
                steps: Vec::new(),
                completed_at: None,
                content_hash: None,
            },
        }
    }

    pub fn add_step(
        &mut self,
        step: &str,
        summary: &str,
        details: serde_json::Value,
        success: bool,
    ) {
        self.journal.steps.push(StepEntry {
            step: step.to_string(),
            summary: summary.to_string(),
            details,
            success,
            timestamp: Utc::now(),
        });
    }

    pub fn run_id(&self) -> &str {
        &self.journal.run_id
    }

    pub fn steps(&self) -> &[StepEntry] {
        &self.journal.steps
    }

    /// Set `completed_at` and compute the content hash.
    pub fn finalize(mut self) -> Result<RunJournal, JournalError> {
        self.journal.completed_at = Some(Utc::now());
        let hash = self.journal.compute_hash()?;
        self.journal.content_hash = Some(hash);
        Ok(self.journal)
    }
}
