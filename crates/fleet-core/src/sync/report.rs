//! Per-run outcome reporting.

use crate::inventory::SkipReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Decision counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// An inventory item the run left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Summary of a finished (or aborted) run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub job: String,
    pub counts: SyncCounts,
    pub skipped: Vec<SkippedItem>,
    /// Mutations applied by the commit; zero for a no-op run.
    pub writes_committed: usize,
    /// Post-commit effects (images, thing groups) that failed.
    pub failed_effects: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            counts: SyncCounts::default(),
            skipped: Vec::new(),
            writes_committed: 0,
            failed_effects: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn skip(&mut self, id: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedItem {
            id: id.into(),
            reason,
        });
    }

    /// Reason an id was skipped, if it was.
    pub fn skip_reason(&self, id: &str) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|item| item.id == id)
            .map(|item| &item.reason)
    }

    pub fn is_noop(&self) -> bool {
        self.writes_committed == 0
    }

    pub(crate) fn finish(&mut self, writes_committed: usize) {
        self.writes_committed = writes_committed;
        self.finished_at = Some(Utc::now());
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} created, {} updated, {} unchanged, {} deleted, {} skipped, {} writes",
            self.job,
            self.counts.created,
            self.counts.updated,
            self.counts.unchanged,
            self.counts.deleted,
            self.skipped.len(),
            self.writes_committed,
        )
    }
}
