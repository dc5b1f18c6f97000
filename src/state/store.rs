//! Resumable state store: cursor lifecycle on top of a key/value repository.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::Utc;

use crate::core::address::TargetAddress;
use crate::core::config::{Config, StateBackendKind};
use crate::core::errors::{Result, ShrError};
use crate::scanner::outcome::OutcomeRecord;
use crate::state::cursor::{ScanCursor, truncate_log};
use crate::state::file_repo::FileCursorRepository;

/// Durable key → string storage for one cursor.
pub trait CursorRepository: Send {
    /// All stored entries; empty when no run exists.
    fn load(&self) -> Result<BTreeMap<String, String>>;
    /// Replace every stored entry with `entries`.
    fn save(&mut self, entries: &BTreeMap<String, String>) -> Result<()>;
    /// Remove every stored entry.
    fn delete(&mut self) -> Result<()>;
    /// Where the state lives, for diagnostics.
    fn describe(&self) -> String;
}

/// Result of [`StateStore::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Started(ScanCursor),
    /// A cursor already exists and was left untouched.
    AlreadyActive(ScanCursor),
}

/// Progress written at the end of a batch.
#[derive(Debug, Clone, Default)]
pub struct CursorUpdate {
    pub page_token: Option<String>,
    /// Ids handled on the page at `page_token`; empty when the position moved.
    pub page_visited: Vec<String>,
    pub processed_count: u64,
    pub new_outcomes: Vec<OutcomeRecord>,
    pub address_index: usize,
    pub current_address: Option<String>,
}

pub struct StateStore {
    repo: Box<dyn CursorRepository>,
    max_log_size: usize,
}

impl StateStore {
    #[must_use]
    pub fn new(repo: Box<dyn CursorRepository>, max_log_size: usize) -> Self {
        Self { repo, max_log_size }
    }

    /// Open the repository selected by `state.backend`.
    pub fn open(config: &Config) -> Result<Self> {
        let repo: Box<dyn CursorRepository> = match config.state.backend {
            StateBackendKind::File => {
                Box::new(FileCursorRepository::new(config.paths.state_file.clone()))
            }
            #[cfg(feature = "sqlite")]
            StateBackendKind::Sqlite => Box::new(
                crate::state::sqlite_repo::SqliteCursorRepository::open(&config.paths.state_db)?,
            ),
            #[cfg(not(feature = "sqlite"))]
            StateBackendKind::Sqlite => {
                return Err(ShrError::InvalidConfig {
                    details: "state.backend = \"sqlite\" requires the sqlite feature".to_string(),
                });
            }
        };
        Ok(Self::new(repo, config.run.max_log_size))
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.repo.describe()
    }

    pub fn load(&self) -> Result<Option<ScanCursor>> {
        ScanCursor::from_entries(&self.repo.load()?)
    }

    /// Load the cursor or fail with [`ShrError::NoActiveRun`].
    pub fn require(&self) -> Result<ScanCursor> {
        self.load()?.ok_or(ShrError::NoActiveRun)
    }

    pub fn save(&mut self, cursor: &ScanCursor) -> Result<()> {
        self.repo.save(&cursor.to_entries()?)
    }

    /// Create a fresh running cursor unless one already exists.
    ///
    /// An existing cursor, running or failed, is returned unchanged.
    pub fn initialize(&mut self, targets: Vec<TargetAddress>) -> Result<InitOutcome> {
        if let Some(existing) = self.load()? {
            eprintln!(
                "[SHR-STATE] start ignored: a run started at {} is still recorded in {}",
                existing.started_at.to_rfc3339(),
                self.repo.describe()
            );
            return Ok(InitOutcome::AlreadyActive(existing));
        }
        let cursor = ScanCursor::new(targets, Utc::now());
        self.save(&cursor)?;
        Ok(InitOutcome::Started(cursor))
    }

    /// Append outcomes, apply the new position and persist.
    pub fn update(&mut self, update: CursorUpdate) -> Result<ScanCursor> {
        let mut cursor = self.require()?;
        cursor.page_token = update.page_token.filter(|t| !t.is_empty());
        cursor.page_visited = update.page_visited;
        cursor.processed_count = update.processed_count;
        cursor.address_index = update.address_index;
        cursor.current_address = update.current_address;
        for record in &update.new_outcomes {
            cursor.tallies.record(record);
        }
        cursor.outcome_log.extend(update.new_outcomes);
        let dropped = truncate_log(&mut cursor.outcome_log, self.max_log_size)?;
        if dropped > 0 {
            cursor.dropped_log_entries += dropped as u64;
            eprintln!(
                "[SHR-STATE] outcome log over {} chars; dropped {dropped} oldest entries",
                self.max_log_size
            );
        }
        cursor.batch_count += 1;
        cursor.updated_at = Utc::now();
        self.save(&cursor)?;
        Ok(cursor)
    }

    /// Delete every key, including any pending continuation.
    pub fn clear(&mut self) -> Result<()> {
        self.repo.delete()
    }

    /// Stop the run after a fatal error, keeping the cursor for diagnostics.
    pub fn mark_failed(&mut self, message: &str) -> Result<Option<ScanCursor>> {
        let Some(mut cursor) = self.load()? else {
            return Ok(None);
        };
        cursor.running = false;
        cursor.last_error = Some(message.to_string());
        cursor.continuation_due_at = None;
        cursor.updated_at = Utc::now();
        self.save(&cursor)?;
        Ok(Some(cursor))
    }

    /// Put a failed run back into the running state at its saved position.
    pub fn reactivate(&mut self) -> Result<ScanCursor> {
        let mut cursor = self.require()?;
        if cursor.running {
            return Ok(cursor);
        }
        cursor.running = true;
        cursor.last_error = None;
        cursor.updated_at = Utc::now();
        self.save(&cursor)?;
        Ok(cursor)
    }
}
