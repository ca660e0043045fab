//! BLAKE3 content hashing for tamper evidence.

use serde::Serialize;

use crate::{JournalError, RunJournal, StepEntry};

/// Hashable view of a journal (excludes `content_hash`).
#[derive(Serialize)]
struct HashableJournal<'a> {
    run_id: &'a str,
    command: &'a str,
    started_at: &'a chrono::DateTime<chrono::Utc>,
    steps: &'a [StepEntry],
    completed_at: &'a Option<chrono::DateTime<chrono::Utc>>,
}

/// Serialize the journal to JSON straight into a BLAKE3 hasher and return
/// the hex digest.
pub fn compute_journal_hash(journal: &RunJournal) -> Result<String, JournalError> {
    let hashable = HashableJournal {
        run_id: &journal.run_id,
        command: &journal.command,
        started_at: &journal.started_at,
        steps: &journal.steps,
        completed_at: &journal.completed_at,
    };

    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, &hashable)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::JournalSession;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let mut session = JournalSession::new("mig-1", "run");
        session.add_step("schema", "12 applied", serde_json::json!({"applied": 12}), true);
        let journal = session.finalize().unwrap();

        assert_eq!(
            compute_journal_hash(&journal).unwrap(),
            compute_journal_hash(&journal).unwrap()
        );

        let mut edited = journal.clone();
        edited.steps[0].summary = "0 applied".to_string();
        assert_ne!(
            compute_journal_hash(&journal).unwrap(),
            compute_journal_hash(&edited).unwrap()
        );
    }

    #[test]
    fn hash_ignores_stored_hash_field() {
        let journal = JournalSession::new("mig-1", "verify").finalize().unwrap();
        let mut cleared = journal.clone();
        cleared.content_hash = None;
        assert_eq!(
            compute_journal_hash(&journal).unwrap(),
            compute_journal_hash(&cleared).unwrap()
        );
    }
}
