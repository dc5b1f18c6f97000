//! Batch scanner: one page of one address per invocation.
//!
//! Pipeline per batch: load cursor -> search the current address at the
//! stored page token -> mutate each file until the budget trips -> persist
//! position and outcomes -> schedule the next continuation, or finalize the
//! run after the last address.
//!
//! Any error from search or the store halts the run: the cursor is kept with
//! `running = false` and `last_error` set, and nothing reschedules it.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::backend::StorageBackend;
use crate::core::address::TargetAddress;
use crate::core::config::Config;
use crate::core::errors::{Result, ShrError};
use crate::daemon::notifications::{NotificationEvent, NotificationManager};
use crate::daemon::scheduler::schedule_continuation;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, RunTotals};
use crate::report::summary::Summary;
use crate::scanner::mutator::PermissionMutator;
use crate::scanner::outcome::OutcomeRecord;
use crate::scanner::query::SearchQuery;
use crate::state::cursor::ScanCursor;
use crate::state::store::{CursorUpdate, InitOutcome, StateStore};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Search page size; one page is one batch.
    pub batch_size: usize,
    /// Delay before the next batch.
    pub retry_delay: Duration,
    /// Where the final summary is written.
    pub report_path: PathBuf,
}

impl BatchSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.run.batch_size,
            retry_delay: Duration::from_secs(config.run.retry_delay_secs),
            report_path: config.paths.report_file.clone(),
        }
    }
}

/// What one `run_batch` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// No running cursor; nothing happened.
    Idle,
    /// The execution budget ran out mid-page; the next batch re-reads the
    /// same page and skips the files already handled.
    Paused,
    /// More pages remain for the current address.
    MorePages,
    /// The current address is done; the next one starts next batch.
    NextAddress,
    /// Every address is done; the store was cleared.
    Completed(Box<Summary>),
    /// The run halted on a fatal error.
    Failed { code: String, message: String },
}

impl BatchStatus {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::MorePages => "more_pages",
            Self::NextAddress => "next_address",
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether another batch is scheduled after this one.
    #[must_use]
    pub const fn continues(&self) -> bool {
        matches!(self, Self::Paused | Self::MorePages | Self::NextAddress)
    }
}

/// Result of asking a stored run to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// A continuation is due now.
    Rescheduled(ScanCursor),
    /// The run halted on an error; resuming needs an explicit retry.
    NeedsRetry(ScanCursor),
}

pub struct BatchScanner {
    backend: Arc<dyn StorageBackend>,
    mutator: PermissionMutator,
    store: StateStore,
    settings: BatchSettings,
    logger: Option<ActivityLoggerHandle>,
    notifier: NotificationManager,
}

impl BatchScanner {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, store: StateStore, settings: BatchSettings) -> Self {
        Self {
            mutator: PermissionMutator::new(Arc::clone(&backend)),
            backend,
            store,
            settings,
            logger: None,
            notifier: NotificationManager::disabled(),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: NotificationManager) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    /// Begin a run over `targets` with a continuation due immediately.
    ///
    /// An existing cursor is left as it is and returned as `AlreadyActive`.
    pub fn start_run(&mut self, targets: Vec<TargetAddress>, config_hash: &str) -> Result<InitOutcome> {
        let outcome = self.store.initialize(targets)?;
        if let InitOutcome::Started(cursor) = &outcome {
            schedule_continuation(&mut self.store, Duration::ZERO)?;
            let targets = target_strings(cursor);
            self.log(ActivityEvent::RunStarted {
                targets: targets.clone(),
                config_hash: config_hash.to_string(),
            });
            self.notifier.notify(&NotificationEvent::RunStarted { targets });
        }
        Ok(outcome)
    }

    /// Make a stored run due now. A failed run is reactivated only with `retry`.
    pub fn resume(&mut self, retry: bool) -> Result<ResumeOutcome> {
        let cursor = self.store.require()?;
        if cursor.is_failed() && !retry {
            return Ok(ResumeOutcome::NeedsRetry(cursor));
        }
        if !cursor.running {
            self.store.reactivate()?;
        }
        schedule_continuation(&mut self.store, Duration::ZERO)?;
        Ok(ResumeOutcome::Rescheduled(self.store.require()?))
    }

    /// Discard the stored run, cancelling its continuation.
    ///
    /// Returns the cursor as it was, or `None` when nothing was stored.
    pub fn stop_run(&mut self, reason: &str) -> Result<Option<ScanCursor>> {
        discard_run(&mut self.store, self.logger.as_ref(), &self.notifier, reason)
    }

    /// Run one batch. `over_budget` is checked before each file.
    pub fn run_batch(&mut self, over_budget: &dyn Fn() -> bool) -> Result<BatchStatus> {
        let cursor = match self.store.load()? {
            Some(cursor) if cursor.running => cursor,
            _ => return Ok(BatchStatus::Idle),
        };
        match self.advance(cursor, over_budget) {
            Ok(status) => Ok(status),
            Err(err) => self.halt(&err),
        }
    }

    fn advance(&mut self, cursor: ScanCursor, over_budget: &dyn Fn() -> bool) -> Result<BatchStatus> {
        let Some(target) = cursor.current_target().cloned() else {
            return self.finalize(&cursor);
        };
        let started = Instant::now();
        let address = target.as_str().to_string();

        let page = self
            .backend
            .search_files(
                &SearchQuery::shared_with(&target),
                self.settings.batch_size,
                cursor.page_token.as_deref(),
            )
            .map_err(|e| ShrError::backend("search files", e))?;
        let page_files = page.files.len();

        let mut processed = cursor.processed_count;
        let mut outcomes = Vec::with_capacity(page_files);
        let mut visited = cursor.page_visited.clone();
        let mut tripped = false;
        for file in page.files {
            // Handled before the last pause on this page.
            if cursor.page_visited.contains(&file.id) {
                continue;
            }
            if over_budget() {
                tripped = true;
                break;
            }
            let outcome = self.mutator.process_file(&file, &address);
            processed += 1;
            visited.push(file.id.clone());
            let record = OutcomeRecord::new(&address, file, outcome);
            if let Some(event) = ActivityEvent::from_record(&record) {
                self.log(event);
            }
            outcomes.push(record);
        }

        let next_token = page.next_page_token.filter(|t| !t.is_empty());
        let (status, update) = if tripped {
            eprintln!("[SHR-BATCH] execution budget reached after {processed} files; pausing");
            (
                BatchStatus::Paused,
                CursorUpdate {
                    page_token: cursor.page_token.clone(),
                    page_visited: visited,
                    processed_count: processed,
                    new_outcomes: outcomes,
                    address_index: cursor.address_index,
                    current_address: Some(address.clone()),
                },
            )
        } else if let Some(token) = next_token {
            (
                BatchStatus::MorePages,
                CursorUpdate {
                    page_token: Some(token),
                    page_visited: Vec::new(),
                    processed_count: processed,
                    new_outcomes: outcomes,
                    address_index: cursor.address_index,
                    current_address: Some(address.clone()),
                },
            )
        } else {
            let next_index = cursor.address_index + 1;
            (
                BatchStatus::NextAddress,
                CursorUpdate {
                    page_token: None,
                    page_visited: Vec::new(),
                    processed_count: processed,
                    new_outcomes: outcomes,
                    address_index: next_index,
                    current_address: cursor.targets.get(next_index).map(|t| t.as_str().to_string()),
                },
            )
        };

        let updated = self.store.update(update)?;
        let status = if matches!(status, BatchStatus::NextAddress) && updated.is_exhausted() {
            self.finalize(&updated)?
        } else {
            schedule_continuation(&mut self.store, self.settings.retry_delay)?;
            status
        };

        self.log(ActivityEvent::BatchCompleted {
            address,
            processed,
            page_files,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            status: status.label().to_string(),
        });
        Ok(status)
    }

    /// Build the summary, deliver it, and clear the store.
    fn finalize(&mut self, cursor: &ScanCursor) -> Result<BatchStatus> {
        let summary = Summary::from_cursor(cursor, Utc::now());
        if let Err(e) = summary.save(&self.settings.report_path) {
            eprintln!("[SHR-REPORT] failed to save report: {e}");
        }
        self.notifier.notify(&NotificationEvent::RunCompleted {
            summary: Box::new(summary.clone()),
        });
        self.log(ActivityEvent::RunCompleted {
            started_at: cursor.started_at.to_rfc3339(),
            targets: target_strings(cursor),
            totals: run_totals(cursor),
        });
        self.store.clear()?;
        Ok(BatchStatus::Completed(Box::new(summary)))
    }

    fn halt(&mut self, err: &ShrError) -> Result<BatchStatus> {
        let code = err.code().to_string();
        let message = err.to_string();
        eprintln!("[SHR-BATCH] run halted: {message}");
        self.store.mark_failed(&message)?;
        self.log(ActivityEvent::Error {
            code: code.clone(),
            message: message.clone(),
        });
        self.notifier.notify(&NotificationEvent::RunFailed {
            code: code.clone(),
            message: message.clone(),
        });
        Ok(BatchStatus::Failed { code, message })
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// Clear a stored run without a backend, reporting it as stopped.
pub fn discard_run(
    store: &mut StateStore,
    logger: Option<&ActivityLoggerHandle>,
    notifier: &NotificationManager,
    reason: &str,
) -> Result<Option<ScanCursor>> {
    let Some(cursor) = store.load()? else {
        return Ok(None);
    };
    store.clear()?;
    if let Some(logger) = logger {
        logger.send(ActivityEvent::RunStopped {
            started_at: cursor.started_at.to_rfc3339(),
            targets: target_strings(&cursor),
            totals: run_totals(&cursor),
            reason: reason.to_string(),
        });
    }
    notifier.notify(&NotificationEvent::RunStopped {
        reason: reason.to_string(),
        processed: cursor.processed_count,
    });
    Ok(Some(cursor))
}

fn target_strings(cursor: &ScanCursor) -> Vec<String> {
    cursor.targets.iter().map(|t| t.as_str().to_string()).collect()
}

fn run_totals(cursor: &ScanCursor) -> RunTotals {
    let t = cursor.tallies.totals();
    RunTotals {
        processed: cursor.processed_count,
        removed: t.removed,
        blocked: t.blocked,
        skipped: t.skipped,
        errors: t.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{BackendError, FileRef, Role};
    use crate::state::file_repo::FileCursorRepository;

    fn targets(list: &[&str]) -> Vec<TargetAddress> {
        list.iter().map(|a| TargetAddress::parse(a).unwrap()).collect()
    }

    fn scanner(dir: &tempfile::TempDir, backend: Arc<MemoryBackend>, batch_size: usize) -> BatchScanner {
        let store = StateStore::new(
            Box::new(FileCursorRepository::new(dir.path().join("state.json"))),
            8_000,
        );
        BatchScanner::new(
            backend,
            store,
            BatchSettings {
                batch_size,
                retry_delay: Duration::from_secs(5),
                report_path: dir.path().join("report.json"),
            },
        )
    }

    fn never() -> bool {
        false
    }

    fn doc(id: &str) -> FileRef {
        FileRef::new(id, format!("Doc {id}"), "application/vnd.google-apps.document", None)
    }

    #[test]
    fn idle_without_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        let mut s = scanner(&dir, backend.clone(), 15);
        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::Idle);
        assert_eq!(backend.calls().search, 0);
    }

    #[test]
    fn single_page_single_address_completes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new("me@x.com")
                .with_file(doc("f1"), &[("a@x.com", Role::Writer)])
                .with_file(doc("f2"), &[("b@x.com", Role::Reader)]),
        );
        let mut s = scanner(&dir, backend.clone(), 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();

        let BatchStatus::Completed(summary) = s.run_batch(&never).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(summary.totals.processed, 1);
        assert_eq!(summary.totals.removed, 1);
        assert!(s.store().load().unwrap().is_none());
        assert!(dir.path().join("report.json").exists());
        assert_eq!(backend.shared_count("a@x.com"), 0);
        assert_eq!(backend.shared_count("b@x.com"), 1);
    }

    #[test]
    fn more_pages_schedules_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        for i in 0..4 {
            backend.add_file(doc(&format!("f{i}")), &[("a@x.com", Role::Reader)]);
        }
        let mut s = scanner(&dir, backend, 3);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();

        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::MorePages);
        let cursor = s.store().require().unwrap();
        assert!(cursor.page_token.is_some());
        assert_eq!(cursor.processed_count, 3);
        assert!(cursor.continuation_due_at.is_some());

        assert!(matches!(s.run_batch(&never).unwrap(), BatchStatus::Completed(_)));
    }

    #[test]
    fn next_address_resets_token() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new("me@x.com").with_file(doc("f1"), &[("a@x.com", Role::Reader)]),
        );
        let mut s = scanner(&dir, backend, 15);
        s.start_run(targets(&["a@x.com", "b@x.com"]), "hash").unwrap();

        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::NextAddress);
        let cursor = s.store().require().unwrap();
        assert_eq!(cursor.address_index, 1);
        assert_eq!(cursor.page_token, None);
        assert_eq!(cursor.current_address.as_deref(), Some("b@x.com"));

        let BatchStatus::Completed(summary) = s.run_batch(&never).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(summary.by_email["a@x.com"].files_found, 1);
        assert_eq!(summary.by_email["b@x.com"].files_found, 0);
    }

    #[test]
    fn budget_trip_keeps_page_token() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        for i in 0..6 {
            backend.add_file(doc(&format!("f{i}")), &[("a@x.com", Role::Reader)]);
        }
        let mut s = scanner(&dir, backend.clone(), 3);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();
        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::MorePages);
        let token = s.store().require().unwrap().page_token;

        let checks = std::cell::Cell::new(0);
        let trip_after_one = || {
            checks.set(checks.get() + 1);
            checks.get() > 1
        };
        assert_eq!(s.run_batch(&trip_after_one).unwrap(), BatchStatus::Paused);
        let cursor = s.store().require().unwrap();
        assert_eq!(cursor.page_token, token);
        assert_eq!(cursor.page_visited, vec!["f3".to_string()]);
        assert_eq!(cursor.processed_count, 4);
        assert!(cursor.running);
        assert_eq!(backend.shared_count("a@x.com"), 2);

        assert!(matches!(s.run_batch(&never).unwrap(), BatchStatus::Completed(_)));
    }

    #[test]
    fn paused_page_skips_files_already_handled() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new("me@x.com")
                .with_file(doc("f1"), &[("a@x.com", Role::Writer)])
                .with_file(doc("f2"), &[("a@x.com", Role::Writer)])
                .block_deletion("f1", "a@x.com")
                .block_deletion("f2", "a@x.com"),
        );
        let mut s = scanner(&dir, backend, 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();

        let checks = std::cell::Cell::new(0);
        let trip_after_one = || {
            checks.set(checks.get() + 1);
            checks.get() > 1
        };
        assert_eq!(s.run_batch(&trip_after_one).unwrap(), BatchStatus::Paused);
        assert_eq!(s.store().require().unwrap().page_visited, vec!["f1".to_string()]);

        let BatchStatus::Completed(summary) = s.run_batch(&never).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(summary.totals.processed, 2);
        assert_eq!(summary.totals.blocked, 2);
    }

    #[test]
    fn search_failure_halts_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        let mut s = scanner(&dir, backend.clone(), 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();
        backend.fail_search_with(Some(BackendError::Http {
            status: 500,
            details: "backend error".to_string(),
        }));

        let status = s.run_batch(&never).unwrap();
        let BatchStatus::Failed { code, message } = status else {
            panic!("expected failure");
        };
        assert_eq!(code, "SHR-3001");
        assert!(message.contains("backend error"));

        let cursor = s.store().require().unwrap();
        assert!(!cursor.running);
        assert!(cursor.is_failed());
        assert!(cursor.continuation_due_at.is_none());

        // A halted run does not continue on its own.
        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::Idle);
    }

    #[test]
    fn resume_requires_retry_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MemoryBackend::new("me@x.com").with_file(doc("f1"), &[("a@x.com", Role::Reader)]),
        );
        let mut s = scanner(&dir, backend.clone(), 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();
        backend.fail_search_with(Some(BackendError::Transport {
            details: "reset".to_string(),
        }));
        assert!(matches!(s.run_batch(&never).unwrap(), BatchStatus::Failed { .. }));

        assert!(matches!(s.resume(false).unwrap(), ResumeOutcome::NeedsRetry(_)));
        backend.fail_search_with(None);
        let ResumeOutcome::Rescheduled(cursor) = s.resume(true).unwrap() else {
            panic!("expected reschedule");
        };
        assert!(cursor.running);
        assert!(cursor.last_error.is_none());
        assert!(matches!(s.run_batch(&never).unwrap(), BatchStatus::Completed(_)));
    }

    #[test]
    fn start_while_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        let mut s = scanner(&dir, backend, 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();
        let before = s.store().require().unwrap();

        let outcome = s.start_run(targets(&["b@x.com"]), "hash").unwrap();
        assert!(matches!(outcome, InitOutcome::AlreadyActive(_)));
        assert_eq!(s.store().require().unwrap(), before);
    }

    #[test]
    fn stop_clears_cursor_and_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("me@x.com"));
        let mut s = scanner(&dir, backend, 15);
        s.start_run(targets(&["a@x.com"]), "hash").unwrap();
        assert!(s.store().require().unwrap().continuation_due_at.is_some());

        let stopped = s.stop_run("operator").unwrap();
        assert!(stopped.is_some());
        assert!(s.store().load().unwrap().is_none());
        assert_eq!(s.run_batch(&never).unwrap(), BatchStatus::Idle);
        assert!(s.stop_run("operator").unwrap().is_none());
    }
}
