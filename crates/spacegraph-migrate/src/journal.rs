//! Journal helpers for runner invocations.

use std::path::Path;

use spacegraph_journal::{FileJournalStore, JournalSession, JournalStore, RunJournal};

use crate::error::MigrateError;
use crate::report::StepReport;

/// Record a finished step.
pub fn record_step<T: StepReport>(session: &mut JournalSession, step: &str, report: &T) {
    let details = serde_json::to_value(report).unwrap_or_else(|e| {
        tracing::warn!(step, error = %e, "Could not serialize step report for journal");
        serde_json::Value::Null
    });
    session.add_step(step, &report.summary(), details, report.clean());
}

/// Record a step that stopped with an error.
pub fn record_failure(session: &mut JournalSession, step: &str, error: &MigrateError) {
    session.add_step(
        step,
        &format!("{step} failed: {error}"),
        serde_json::json!({ "error": error.to_string() }),
        false,
    );
}

/// Finalize the session and write it under `journal_dir`.
///
/// Journal problems are logged and never fail the invocation.
pub fn finalize_and_store(session: JournalSession, journal_dir: &Path) -> Option<RunJournal> {
    let journal = match session.finalize() {
        Ok(journal) => journal,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to finalize run journal");
            return None;
        }
    };

    match FileJournalStore::new(journal_dir) {
        Ok(store) => match store.save(&journal) {
            Ok(path) => {
                tracing::info!(
                    run_id = %journal.run_id,
                    command = %journal.command,
                    path = %path.display(),
                    "Run journal recorded"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Failed to store run journal"),
        },
        Err(e) => tracing::warn!(error = %e, "Failed to initialize journal store"),
    }
    Some(journal)
}
