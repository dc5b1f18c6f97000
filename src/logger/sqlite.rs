//! SQLite activity database: per-action rows plus one row per finished run.
//!
//! WAL mode keeps `shrev history` readable while a batch is writing.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, ShrError};

pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ShrError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── activity_log ────────────────────

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, address, file_id, file_name,
                role, link, duration_ms, success, error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.address,
                row.file_id,
                row.file_name,
                row.role,
                row.link,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Most recent activity entries, newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, address, file_id, file_name,
                    role, link, duration_ms, success, error_code, error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    address: row.get(3)?,
                    file_id: row.get(4)?,
                    file_name: row.get(5)?,
                    role: row.get(6)?,
                    link: row.get(7)?,
                    duration_ms: row.get(8)?,
                    success: row.get(9)?,
                    error_code: row.get(10)?,
                    error_message: row.get(11)?,
                    details: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    // ──────────────────── run_history ────────────────────

    pub fn record_run(&self, row: &RunRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO run_history (
                started_at, finished_at, targets, processed, removed,
                blocked, skipped, errors, outcome
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?
            .execute(params![
                row.started_at,
                row.finished_at,
                row.targets,
                row.processed,
                row.removed,
                row.blocked,
                row.skipped,
                row.errors,
                row.outcome,
            ])?;
        Ok(())
    }

    /// Finished runs, newest first.
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT started_at, finished_at, targets, processed, removed,
                    blocked, skipped, errors, outcome
             FROM run_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(RunRow {
                    started_at: row.get(0)?,
                    finished_at: row.get(1)?,
                    targets: row.get(2)?,
                    processed: row.get(3)?,
                    removed: row.get(4)?,
                    blocked: row.get(5)?,
                    skipped: row.get(6)?,
                    errors: row.get(7)?,
                    outcome: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

/// Row for the `activity_log` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub address: Option<String>,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub role: Option<String>,
    pub link: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

impl ActivityRow {
    /// Minimal successful row; callers fill in the optional columns.
    #[must_use]
    pub fn new(timestamp: &str, event_type: &str, severity: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            event_type: event_type.to_string(),
            severity: severity.to_string(),
            address: None,
            file_id: None,
            file_name: None,
            role: None,
            link: None,
            duration_ms: None,
            success: 1,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Row for the `run_history` table. `targets` is a comma-joined address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub started_at: String,
    pub finished_at: String,
    pub targets: String,
    pub processed: i64,
    pub removed: i64,
    pub blocked: i64,
    pub skipped: i64,
    pub errors: i64,
    /// `completed`, `stopped` or `failed`.
    pub outcome: String,
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SHR-SQLITE] WAL unavailable, journal_mode={mode}");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            address TEXT,
            file_id TEXT,
            file_name TEXT,
            role TEXT,
            link TEXT,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );
        CREATE TABLE IF NOT EXISTS run_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            targets TEXT NOT NULL,
            processed INTEGER NOT NULL,
            removed INTEGER NOT NULL,
            blocked INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            outcome TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_address ON activity_log(address);",
    )?;
    Ok(())
}
