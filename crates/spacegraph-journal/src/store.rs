//! Journal storage: trait + date-partitioned file implementation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::RunJournal;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal not found: {0}")]
    NotFound(String),

    #[error("Integrity check failed for journal {0}: stored hash does not match content")]
    IntegrityViolation(String),

    #[error("Journal has no content hash (not finalized)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filters for listing journals.
#[derive(Debug, Default)]
pub struct JournalQuery {
    pub run_id: Option<String>,
    pub command: Option<String>,
    /// Only journals started at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only journals started at or before this time.
    pub to: Option<DateTime<Utc>>,
}

pub trait JournalStore {
    /// Store a finalized journal, returning where it was written.
    fn save(&self, journal: &RunJournal) -> Result<PathBuf, JournalError>;

    /// Load the journal of one invocation, verifying integrity.
    fn get(&self, run_id: &str, command: &str) -> Result<RunJournal, JournalError>;

    /// Journals matching the query, newest first.
    fn list(&self, query: &JournalQuery) -> Result<Vec<RunJournal>, JournalError>;
}

/// Stores journals as JSON files:
/// ```text
/// {root}/
///   2026/
///     10/
///       17/
///         {run_id}-{command}.json
/// ```
pub struct FileJournalStore {
    root: PathBuf,
}

impl FileJournalStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn journal_path(&self, journal: &RunJournal) -> PathBuf {
        let date = journal.started_at.format("%Y/%m/%d");
        self.root
            .join(date.to_string())
            .join(file_name(&journal.run_id, &journal.command))
    }
}

fn file_name(run_id: &str, command: &str) -> String {
    format!("{run_id}-{command}.json")
}

impl JournalStore for FileJournalStore {
    fn save(&self, journal: &RunJournal) -> Result<PathBuf, JournalError> {
        if journal.content_hash.is_none() {
            return Err(JournalError::NotFinalized);
        }

        let path = self.journal_path(journal);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(journal)?)?;

        tracing::debug!(
            run_id = %journal.run_id,
            command = %journal.command,
            path = %path.display(),
            "Journal saved"
        );
        Ok(path)
    }

    fn get(&self, run_id: &str, command: &str) -> Result<RunJournal, JournalError> {
        let name = file_name(run_id, command);
        let path = find_file_recursive(&self.root, &name)
            .ok_or_else(|| JournalError::NotFound(name.clone()))?;
        let journal: RunJournal = serde_json::from_str(&fs::read_to_string(&path)?)?;

        if !journal.verify_integrity() {
            return Err(JournalError::IntegrityViolation(name));
        }
        Ok(journal)
    }

    fn list(&self, query: &JournalQuery) -> Result<Vec<RunJournal>, JournalError> {
        let mut results = Vec::new();
        collect_recursive(&self.root, query, &mut results)?;
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(results)
    }
}

fn find_file_recursive(dir: &Path, filename: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }
    None
}

fn collect_recursive(
    dir: &Path,
    query: &JournalQuery,
    results: &mut Vec<RunJournal>,
) -> Result<(), JournalError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, query, results)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let journal: RunJournal = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if matches_query(&journal, query) {
                results.push(journal);
            }
        }
    }
    Ok(())
}

fn matches_query(journal: &RunJournal, query: &JournalQuery) -> bool {
    if let Some(run_id) = &query.run_id {
        if &journal.run_id != run_id {
            return false;
        }
    }
    if let Some(command) = &query.command {
        if &journal.command != command {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &journal.started_at < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &journal.started_at > to {
            return false;
        }
    }
    true
}
