//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are built in memory and written with a single `write_all`, so a
//! concurrent `tail -f` never sees a partial record. When the primary file
//! cannot be written the writer degrades: fallback file, then stderr with a
//! `[SHR-JSONL]` prefix, then silent discard. A run never fails because
//! logging failed.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::config::PathsConfig;
use crate::core::errors::{Result, ShrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Activity event kinds as they appear in the `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    BatchComplete,
    PermissionRemoved,
    PermissionBlocked,
    FileSkipped,
    FileFailed,
    RunComplete,
    RunStop,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::BatchComplete => "batch_complete",
            Self::PermissionRemoved => "permission_removed",
            Self::PermissionBlocked => "permission_blocked",
            Self::FileSkipped => "file_skipped",
            Self::FileFailed => "file_failed",
            Self::RunComplete => "run_complete",
            Self::RunStop => "run_stop",
            Self::Error => "error",
        }
    }
}

/// One JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Files processed so far in the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// SHR error code when the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            address: None,
            file_id: None,
            file_name: None,
            link: None,
            role: None,
            processed: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this many bytes.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    /// Log under the configured data directory, falling back to the temp dir.
    #[must_use]
    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self {
            path: paths.jsonl_log.clone(),
            fallback_path: Some(std::env::temp_dir().join("shrev-activity.jsonl")),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathsConfig::default().jsonl_log,
            fallback_path: None,
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only writer with size-based rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    sink: Sink,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            sink: Sink::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        let primary = w.config.path.clone();
        if !w.attach(&primary, Sink::Primary) {
            w.fall_back();
        }
        w
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[SHR-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    /// Current sink name: `normal`, `fallback`, `stderr` or `discard`.
    #[must_use]
    pub const fn state(&self) -> &'static str {
        match self.sink {
            Sink::Primary => "normal",
            Sink::Fallback => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Return to the primary path after a degradation, if it is writable again.
    pub fn try_recover(&mut self) {
        if self.sink == Sink::Primary {
            return;
        }
        let primary = self.config.path.clone();
        if self.attach(&primary, Sink::Primary) {
            let _ = writeln!(
                io::stderr(),
                "[SHR-JSONL] recovered to primary path: {}",
                primary.display()
            );
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.bytes_written + len > self.config.max_size_bytes
            && matches!(self.sink, Sink::Primary | Sink::Fallback)
        {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    if self.last_fsync.elapsed() >= Duration::from_secs(self.config.fsync_interval_secs) {
                        self.fsync();
                    }
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[SHR-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    /// Open `path` for append and make it the active sink.
    fn attach(&mut self, path: &Path, sink: Sink) -> bool {
        match open_append(path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.sink = sink;
                self.bytes_written = size;
                true
            }
            Err(_) => false,
        }
    }

    fn fall_back(&mut self) {
        self.writer = None;
        let fallback = self.config.fallback_path.clone();
        if let Some(fb) = fallback
            && self.attach(&fb, Sink::Fallback)
        {
            let _ = writeln!(
                io::stderr(),
                "[SHR-JSONL] primary path failed, using fallback: {}",
                fb.display()
            );
            return;
        }
        self.sink = Sink::Stderr;
        let _ = writeln!(io::stderr(), "[SHR-JSONL] no writable log file, using stderr");
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.sink {
            Sink::Primary => self.fall_back(),
            Sink::Fallback => {
                self.sink = Sink::Stderr;
                let _ = writeln!(io::stderr(), "[SHR-JSONL] fallback write failed, using stderr");
            }
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    /// Shift `log.N` → `log.N+1`, move the live file to `log.1`, reopen.
    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        let base = match self.sink {
            Sink::Primary => self.config.path.clone(),
            Sink::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            Sink::Stderr | Sink::Discard => return,
        };

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        let sink = self.sink;
        if !self.attach(&base, sink) {
            self.degrade();
        }
    }
}

/// Open or create a file for appending. Returns `(file, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ShrError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ShrError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn entries_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::PermissionRemoved, Severity::Info);
        entry.address = Some("a@x.com".to_string());
        entry.file_id = Some("f1".to_string());
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::BatchComplete, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "permission_removed");
        assert_eq!(first["address"], "a@x.com");
        assert_eq!(first["severity"], "info");
    }

    #[test]
    fn absent_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::RunStart, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"address\""));
        assert!(!line.contains("\"file_id\""));
        assert!(!line.contains("\"error_code\""));
    }

    #[test]
    fn rotation_keeps_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 100));
        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::BatchComplete, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn unwritable_primary_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(
            PathBuf::from("/nonexistent_shrev_test_dir_5150/primary.jsonl"),
            1024 * 1024,
        );
        cfg.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(cfg);

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn no_fallback_degrades_to_stderr() {
        let writer = JsonlWriter::open(config(
            PathBuf::from("/nonexistent_shrev_test_dir_5150/primary.jsonl"),
            1024,
        ));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn event_names_match_serde() {
        for event in [EventType::RunStart, EventType::FileSkipped, EventType::RunStop] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }
}
