//! Dual-write activity logger: SQLite and JSONL behind one channel.
//!
//! A dedicated thread owns the `SqliteLogger` and `JsonlWriter`. Callers send
//! `ActivityEvent`s over a bounded crossbeam channel with `try_send`, so a slow
//! disk never stalls a batch. Events that do not fit are counted and reported
//! as a warning line once the thread catches up.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::backend::FileRef;
use crate::core::config::Config;
use crate::core::errors::{Result, ShrError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, RunRow, SqliteLogger};
use crate::scanner::outcome::{Outcome, OutcomeRecord};

const CHANNEL_CAPACITY: usize = 1024;
/// Activity rows older than this are pruned when the logger opens the database.
#[cfg(feature = "sqlite")]
const ACTIVITY_RETENTION_DAYS: u32 = 90;

/// Totals carried by a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub processed: u64,
    pub removed: u64,
    pub blocked: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        targets: Vec<String>,
        config_hash: String,
    },
    BatchCompleted {
        address: String,
        processed: u64,
        page_files: usize,
        duration_ms: u64,
        status: String,
    },
    PermissionRemoved {
        address: String,
        file: FileRef,
        role: String,
    },
    PermissionBlocked {
        address: String,
        file: FileRef,
        role: String,
        message: String,
    },
    FileSkipped {
        address: String,
        file: FileRef,
        reason: String,
    },
    FileFailed {
        address: String,
        file: FileRef,
        message: String,
    },
    RunCompleted {
        started_at: String,
        targets: Vec<String>,
        totals: RunTotals,
    },
    RunStopped {
        started_at: String,
        targets: Vec<String>,
        totals: RunTotals,
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel that ends the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Event for one file outcome. `NoMatch` is not logged.
    #[must_use]
    pub fn from_record(record: &OutcomeRecord) -> Option<Self> {
        let address = record.address.clone();
        let file = record.file.clone();
        match &record.outcome {
            Outcome::NoMatch => None,
            Outcome::Removed { role } => Some(Self::PermissionRemoved {
                address,
                file,
                role: role.as_str().to_string(),
            }),
            Outcome::FoundButBlocked { role, message } => Some(Self::PermissionBlocked {
                address,
                file,
                role: role.as_str().to_string(),
                message: message.clone(),
            }),
            Outcome::Skipped { reason } => Some(Self::FileSkipped {
                address,
                file,
                reason: reason.clone(),
            }),
            Outcome::Failed { message, .. } => Some(Self::FileFailed {
                address,
                file,
                message: message.clone(),
            }),
        }
    }
}

/// Cloneable sender side of the logger. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event; a full channel drops it and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct DualLoggerConfig {
    /// `None` disables the SQLite side.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sqlite_path: cfg!(feature = "sqlite").then(|| config.paths.activity_db.clone()),
            jsonl_config: JsonlConfig::from_paths(&config.paths),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Spawn the logger thread. It runs until `shutdown()` or every handle is dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("shrev-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.sqlite_path, config.jsonl_config, dropped);
        })
        .map_err(|e| ShrError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => {
            if let Err(e) = db.prune_activity_log(ACTIVITY_RETENTION_DAYS) {
                eprintln!("[SHR-DUAL] activity prune failed: {e}");
            }
            Some(db)
        }
        Err(e) => {
            eprintln!("[SHR-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;

    let mut jsonl = JsonlWriter::open(jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        if matches!(event, ActivityEvent::BatchCompleted { .. }) {
            jsonl.try_recover();
        }
        jsonl.write_entry(&event_to_log_entry(&event));

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            let activity_ok = event_to_activity_row(&event)
                .as_ref()
                .is_none_or(|row| db.log_activity(row).is_ok());
            let run_ok = event_to_run_row(&event)
                .as_ref()
                .is_none_or(|row| db.record_run(row).is_ok());
            if activity_ok && run_ok {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= 3 {
                    eprintln!("[SHR-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn file_fields(entry: &mut LogEntry, address: &str, file: &FileRef) {
    entry.address = Some(address.to_string());
    entry.file_id = Some(file.id.clone());
    entry.file_name = Some(file.name.clone());
    entry.link = Some(file.link.clone());
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            targets,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.details = Some(format!(
                "targets={} config_hash={config_hash}",
                targets.join(",")
            ));
            e
        }
        ActivityEvent::BatchCompleted {
            address,
            processed,
            page_files,
            duration_ms,
            status,
        } => {
            let mut e = LogEntry::new(EventType::BatchComplete, Severity::Info);
            e.address = Some(address.clone());
            e.processed = Some(*processed);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("page_files={page_files} status={status}"));
            e
        }
        ActivityEvent::PermissionRemoved {
            address,
            file,
            role,
        } => {
            let mut e = LogEntry::new(EventType::PermissionRemoved, Severity::Info);
            file_fields(&mut e, address, file);
            e.role = Some(role.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::PermissionBlocked {
            address,
            file,
            role,
            message,
        } => {
            let mut e = LogEntry::new(EventType::PermissionBlocked, Severity::Warning);
            file_fields(&mut e, address, file);
            e.role = Some(role.clone());
            e.ok = Some(false);
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::FileSkipped {
            address,
            file,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::FileSkipped, Severity::Info);
            file_fields(&mut e, address, file);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::FileFailed {
            address,
            file,
            message,
        } => {
            let mut e = LogEntry::new(EventType::FileFailed, Severity::Warning);
            file_fields(&mut e, address, file);
            e.ok = Some(false);
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::RunCompleted { totals, .. } => {
            let mut e = LogEntry::new(EventType::RunComplete, Severity::Info);
            e.processed = Some(totals.processed);
            e.ok = Some(true);
            e.details = Some(totals_details(totals));
            e
        }
        ActivityEvent::RunStopped { totals, reason, .. } => {
            let mut e = LogEntry::new(EventType::RunStop, Severity::Warning);
            e.processed = Some(totals.processed);
            e.details = Some(format!("reason={reason} {}", totals_details(totals)));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunStop, Severity::Info),
    }
}

fn totals_details(t: &RunTotals) -> String {
    format!(
        "removed={} blocked={} skipped={} errors={}",
        t.removed, t.blocked, t.skipped, t.errors
    )
}

#[cfg(feature = "sqlite")]
fn event_to_activity_row(event: &ActivityEvent) -> Option<ActivityRow> {
    if matches!(event, ActivityEvent::Shutdown) {
        return None;
    }
    let entry = event_to_log_entry(event);
    let mut row = ActivityRow::new(&entry.ts, entry.event.as_str(), entry.severity.as_str());
    row.address = entry.address;
    row.file_id = entry.file_id;
    row.file_name = entry.file_name;
    row.role = entry.role;
    row.link = entry.link;
    row.duration_ms = entry.duration_ms.and_then(|ms| i64::try_from(ms).ok());
    row.success = i32::from(entry.ok.unwrap_or(true));
    row.error_code = entry.error_code;
    row.error_message = entry.error_message;
    row.details = entry.details;
    Some(row)
}

#[cfg(feature = "sqlite")]
fn event_to_run_row(event: &ActivityEvent) -> Option<RunRow> {
    let (started_at, targets, totals, outcome) = match event {
        ActivityEvent::RunCompleted {
            started_at,
            targets,
            totals,
        } => (started_at, targets, totals, "completed"),
        ActivityEvent::RunStopped {
            started_at,
            targets,
            totals,
            ..
        } => (started_at, targets, totals, "stopped"),
        _ => return None,
    };
    let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    Some(RunRow {
        started_at: started_at.clone(),
        finished_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        targets: targets.join(","),
        processed: clamp(totals.processed),
        removed: clamp(totals.removed),
        blocked: clamp(totals.blocked),
        skipped: clamp(totals.skipped),
        errors: clamp(totals.errors),
        outcome: outcome.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;

    fn jsonl(dir: &std::path::Path, name: &str) -> JsonlConfig {
        JsonlConfig {
            path: dir.join(name),
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    fn test_config(dir: &std::path::Path) -> DualLoggerConfig {
        DualLoggerConfig {
            sqlite_path: Some(dir.join("test.db")),
            jsonl_config: jsonl(dir, "test.jsonl"),
            channel_capacity: 64,
        }
    }

    fn file(id: &str) -> FileRef {
        FileRef::new(id, "Budget.xlsx", "application/vnd.ms-excel", None)
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.send(ActivityEvent::RunStarted {
            targets: vec!["a@x.com".to_string()],
            config_hash: "abc".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert!(contents.contains("run_start"));
        assert!(contents.contains("a@x.com"));
    }

    #[test]
    fn outcome_events_reach_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();

        let removed = OutcomeRecord::new("a@x.com", file("f1"), Outcome::Removed { role: Role::Writer });
        let blocked = OutcomeRecord::new(
            "a@x.com",
            file("f2"),
            Outcome::FoundButBlocked {
                role: Role::Owner,
                message: "owner cannot be removed".to_string(),
            },
        );
        let none = OutcomeRecord::new("a@x.com", file("f3"), Outcome::NoMatch);
        for record in [&removed, &blocked, &none] {
            if let Some(event) = ActivityEvent::from_record(record) {
                handle.send(event);
            }
        }
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("https://drive.google.com/open?id=f2"));

        #[cfg(feature = "sqlite")]
        {
            let db = SqliteLogger::open(&dir.path().join("test.db")).unwrap();
            let since = "2020-01-01T00:00:00Z";
            assert_eq!(db.count_events_since("permission_removed", since).unwrap(), 1);
            assert_eq!(db.count_events_since("permission_blocked", since).unwrap(), 1);
            let rows = db.recent_activity(1).unwrap();
            assert_eq!(rows[0].success, 0);
        }
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn finished_runs_land_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.send(ActivityEvent::RunCompleted {
            started_at: "2026-10-18T09:00:00.000Z".to_string(),
            targets: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            totals: RunTotals {
                processed: 37,
                removed: 4,
                ..RunTotals::default()
            },
        });
        handle.shutdown();
        join.join().unwrap();

        let db = SqliteLogger::open(&dir.path().join("test.db")).unwrap();
        let runs = db.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "completed");
        assert_eq!(runs[0].targets, "a@x.com,b@x.com");
        assert_eq!(runs[0].processed, 37);
    }

    #[test]
    fn handles_are_cloneable() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let other = handle.clone();
        handle.send(ActivityEvent::Error {
            code: "SHR-3001".to_string(),
            message: "boom".to_string(),
        });
        other.send(ActivityEvent::BatchCompleted {
            address: "a@x.com".to_string(),
            processed: 15,
            page_files: 15,
            duration_ms: 900,
            status: "more_pages".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn sqlite_disabled_when_path_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = DualLoggerConfig {
            sqlite_path: None,
            jsonl_config: jsonl(dir.path(), "no_sqlite.jsonl"),
            channel_capacity: 64,
        };
        let (handle, join) = spawn_logger(config).unwrap();
        handle.send(ActivityEvent::Error {
            code: "SHR-9999".to_string(),
            message: "test error".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("no_sqlite.jsonl")).unwrap();
        assert!(contents.contains("SHR-9999"));
        assert!(!dir.path().join("test.db").exists());
    }

    #[test]
    fn dropped_counter_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = DualLoggerConfig {
            sqlite_path: None,
            jsonl_config: jsonl(dir.path(), "drop.jsonl"),
            channel_capacity: 2,
        };
        let (handle, join) = spawn_logger(config).unwrap();
        assert_eq!(handle.dropped_events(), 0);
        handle.shutdown();
        join.join().unwrap();
    }
}
