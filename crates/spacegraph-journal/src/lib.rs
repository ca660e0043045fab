//! spacegraph-journal: tamper-evident record of migration runs.
//!
//! Every runner invocation (a single step, a full run, or a rollback)
//! records the steps it executed together with their counts. On
//! finalization the journal is content-hashed with BLAKE3 so later edits
//! to the stored file are detectable.

pub mod hash;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use session::JournalSession;
pub use store::{FileJournalStore, JournalError, JournalQuery, JournalStore};

// ── Core Types ───────────────────────────────────────────────────

/// One executed step and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepEntry {
    /// Step name (e.g. "schema", "backfill_users", "link").
    pub step: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// The step's structured report.
    pub details: serde_json::Value,
    /// False when the step aborted on a systemic failure or was refused.
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// The journal of a single runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunJournal {
    /// Migration run identifier the invocation acted under.
    pub run_id: String,
    /// CLI command that was executed ("run", "backfill", "rollback", ...).
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepEntry>,
    pub completed_at: Option<DateTime<Utc>>,
    /// BLAKE3 content hash (hex), set on finalization.
    pub content_hash: Option<String>,
}

impl RunJournal {
    /// The BLAKE3 hash of every field except `content_hash` itself.
    pub fn compute_hash(&self) -> Result<String, JournalError> {
        hash::compute_journal_hash(self)
    }

    /// Whether the stored hash matches a freshly computed one.
    pub fn verify_integrity(&self) -> bool {
        match (&self.content_hash, self.compute_hash()) {
            (Some(stored), Ok(computed)) => stored == &computed,
            _ => false,
        }
    }

    /// True when every recorded step succeeded.
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }
}
