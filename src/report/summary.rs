//! End-of-run summary derived from a finished cursor.
//!
//! Counts come from the exact tallies. The manual-review list comes from the
//! outcome log, which may have been truncated; `log_entries_dropped` says so.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::Role;
use crate::core::errors::{Result, ShrError};
use crate::scanner::classify::FileCategory;
use crate::scanner::outcome::Outcome;
use crate::state::cursor::{AddressStats, ScanCursor, TypeStats};

/// Run-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Files visited across all addresses (a file shared with two targets counts twice).
    pub processed: u64,
    pub removed: u64,
    pub blocked: u64,
    pub skipped: u64,
    pub errors: u64,
    pub no_match: u64,
}

/// A matching permission the backend refused to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCase {
    pub file_id: String,
    pub file_name: String,
    pub link: String,
    pub role: Role,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<String>,
    pub totals: Totals,
    /// One entry per target, including targets with no shared files.
    pub by_email: BTreeMap<String, AddressStats>,
    pub by_type: BTreeMap<FileCategory, TypeStats>,
    /// Blocked cases grouped by address, in the order they were recorded.
    pub manual_review: BTreeMap<String, Vec<BlockedCase>>,
    pub batch_count: u64,
    pub log_entries_retained: usize,
    pub log_entries_dropped: u64,
}

impl Summary {
    #[must_use]
    pub fn from_cursor(cursor: &ScanCursor, finished_at: DateTime<Utc>) -> Self {
        let mut by_email: BTreeMap<String, AddressStats> = cursor
            .targets
            .iter()
            .map(|t| (t.as_str().to_string(), AddressStats::default()))
            .collect();
        for (address, stats) in &cursor.tallies.by_address {
            by_email.insert(address.clone(), *stats);
        }

        let t = cursor.tallies.totals();
        let totals = Totals {
            processed: cursor.processed_count,
            removed: t.removed,
            blocked: t.blocked,
            skipped: t.skipped,
            errors: t.errors,
            no_match: t.no_match,
        };

        let mut manual_review: BTreeMap<String, Vec<BlockedCase>> = BTreeMap::new();
        for record in &cursor.outcome_log {
            if let Outcome::FoundButBlocked { role, message } = &record.outcome {
                manual_review
                    .entry(record.address.clone())
                    .or_default()
                    .push(BlockedCase {
                        file_id: record.file.id.clone(),
                        file_name: record.file.name.clone(),
                        link: record.file.link.clone(),
                        role: *role,
                        message: message.clone(),
                    });
            }
        }

        Self {
            started_at: cursor.started_at,
            finished_at,
            targets: cursor.targets.iter().map(|t| t.as_str().to_string()).collect(),
            totals,
            by_email,
            by_type: cursor.tallies.by_type.clone(),
            manual_review,
            batch_count: cursor.batch_count,
            log_entries_retained: cursor.outcome_log.len(),
            log_entries_dropped: cursor.dropped_log_entries,
        }
    }

    /// True when some blocked cases may be missing from `manual_review`.
    #[must_use]
    pub const fn manual_review_truncated(&self) -> bool {
        self.log_entries_dropped > 0 && self.totals.blocked > 0
    }

    #[must_use]
    pub fn blocked_case_count(&self) -> usize {
        self.manual_review.values().map(Vec::len).sum()
    }

    /// Write atomically as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ShrError::io(parent, source))?;
        }
        let tmp = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, data).map_err(|source| ShrError::io(&tmp, source))?;
        fs::rename(&tmp, path).map_err(|source| ShrError::io(path, source))
    }

    /// Load the last saved summary; `None` when no report exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ShrError::Serialization {
                    context: "report file",
                    details: format!("{}: {e}", path.display()),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShrError::io(path, e)),
        }
    }
}
