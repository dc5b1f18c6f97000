//! Windowed aggregates over the activity database for `shrev history`.

#![allow(missing_docs)]

use std::time::Duration;

use rusqlite::params;
use serde::Serialize;

use crate::core::errors::Result;
use crate::logger::sqlite::SqliteLogger;

pub const STANDARD_WINDOWS: &[Duration] = &[
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60),
    Duration::from_secs(7 * 24 * 60 * 60),
    Duration::from_secs(30 * 24 * 60 * 60),
];

/// Action counts within one time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub window_secs: u64,
    pub label: String,
    pub removed: u64,
    pub blocked: u64,
    pub skipped: u64,
    pub failed: u64,
    pub runs_started: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressStat {
    pub address: String,
    pub removed: u64,
    pub blocked: u64,
}

/// Read-only view over the activity database.
pub struct StatsEngine<'a> {
    db: &'a SqliteLogger,
}

impl<'a> StatsEngine<'a> {
    pub fn new(db: &'a SqliteLogger) -> Self {
        Self { db }
    }

    pub fn summary(&self) -> Result<Vec<WindowStats>> {
        STANDARD_WINDOWS
            .iter()
            .map(|&w| self.window_stats(w))
            .collect()
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn window_stats(&self, window: Duration) -> Result<WindowStats> {
        let since = since_timestamp(window);
        let count = |event: &str| -> Result<u64> {
            Ok(self.db.count_events_since(event, &since)?.max(0) as u64)
        };
        Ok(WindowStats {
            window_secs: window.as_secs(),
            label: window_label(window),
            removed: count("permission_removed")?,
            blocked: count("permission_blocked")?,
            skipped: count("file_skipped")?,
            failed: count("file_failed")?,
            runs_started: count("run_start")?,
        })
    }

    /// Addresses with the most removals in the window, busiest first.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn top_addresses(&self, n: usize, window: Duration) -> Result<Vec<AddressStat>> {
        let since = since_timestamp(window);
        let mut stmt = self.db.connection().prepare_cached(
            "SELECT address,
                    SUM(CASE WHEN event_type = 'permission_removed' THEN 1 ELSE 0 END) AS removed,
                    SUM(CASE WHEN event_type = 'permission_blocked' THEN 1 ELSE 0 END) AS blocked
             FROM activity_log
             WHERE address IS NOT NULL AND timestamp >= ?1
               AND event_type IN ('permission_removed', 'permission_blocked')
             GROUP BY address
             ORDER BY removed DESC, address ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, n as i64], |row| {
                Ok(AddressStat {
                    address: row.get(0)?,
                    removed: row.get::<_, i64>(1)?.max(0) as u64,
                    blocked: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn export_json(&self) -> Result<serde_json::Value> {
        let windows = self.summary()?;
        let top = self.top_addresses(10, Duration::from_secs(30 * 24 * 60 * 60))?;
        Ok(serde_json::json!({
            "windows": windows,
            "top_addresses_30d": top,
        }))
    }
}

#[allow(clippy::cast_possible_wrap)]
fn since_timestamp(window: Duration) -> String {
    let since = chrono::Utc::now() - chrono::Duration::seconds(window.as_secs() as i64);
    since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn window_label(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 3600 {
        format!("{} min", secs / 60)
    } else if secs < 86_400 {
        match secs / 3600 {
            1 => "1 hour".to_string(),
            h => format!("{h} hours"),
        }
    } else {
        match secs / 86_400 {
            1 => "1 day".to_string(),
            d => format!("{d} days"),
        }
    }
}
