//! Scan cursor: the single persisted record describing an in-flight run.
//!
//! The cursor is flattened to a key → string map for storage. Scalars are
//! stored as their display form, structured values (log, targets, tallies)
//! as compact JSON, and absent optionals as the empty string.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::address::TargetAddress;
use crate::core::errors::{Result, ShrError};
use crate::scanner::classify::{FileCategory, classify};
use crate::scanner::outcome::{Outcome, OutcomeRecord};

pub const KEY_RUNNING: &str = "running";
pub const KEY_ADDRESS_INDEX: &str = "address_index";
pub const KEY_PAGE_TOKEN: &str = "page_token";
pub const KEY_PAGE_VISITED: &str = "page_visited";
pub const KEY_PROCESSED_COUNT: &str = "processed_count";
pub const KEY_START_TIMESTAMP: &str = "start_timestamp";
pub const KEY_CURRENT_ADDRESS: &str = "current_address";
pub const KEY_OUTCOME_LOG: &str = "outcome_log";
pub const KEY_TARGETS: &str = "targets";
pub const KEY_TALLIES: &str = "tallies";
pub const KEY_BATCH_COUNT: &str = "batch_count";
pub const KEY_DROPPED_LOG_ENTRIES: &str = "dropped_log_entries";
pub const KEY_CONTINUATION_DUE_AT: &str = "continuation_due_at";
pub const KEY_LAST_ERROR: &str = "last_error";
pub const KEY_UPDATED_AT: &str = "updated_at";

// ──────────────────── tallies ────────────────────

/// Exact per-address counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStats {
    /// Files the search returned and the mutator visited.
    pub files_found: u64,
    pub removed: u64,
    pub blocked: u64,
    pub skipped: u64,
    pub errors: u64,
    pub no_match: u64,
}

/// Exact per-category counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    pub files: u64,
    pub removed: u64,
    pub blocked: u64,
}

/// Running counters kept apart from the lossy outcome log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tallies {
    pub by_address: BTreeMap<String, AddressStats>,
    pub by_type: BTreeMap<FileCategory, TypeStats>,
}

impl Tallies {
    pub fn record(&mut self, record: &OutcomeRecord) {
        let stats = self.by_address.entry(record.address.clone()).or_default();
        stats.files_found += 1;
        match &record.outcome {
            Outcome::NoMatch => stats.no_match += 1,
            Outcome::Removed { .. } => stats.removed += 1,
            Outcome::FoundButBlocked { .. } => stats.blocked += 1,
            Outcome::Skipped { .. } => stats.skipped += 1,
            Outcome::Failed { .. } => stats.errors += 1,
        }

        let by_type = self
            .by_type
            .entry(classify(&record.file.mime_type))
            .or_default();
        by_type.files += 1;
        if record.outcome.removed() {
            by_type.removed += 1;
        }
        if record.outcome.found_but_blocked() {
            by_type.blocked += 1;
        }
    }

    /// Sum across all addresses.
    #[must_use]
    pub fn totals(&self) -> AddressStats {
        self.by_address
            .values()
            .fold(AddressStats::default(), |mut acc, s| {
                acc.files_found += s.files_found;
                acc.removed += s.removed;
                acc.blocked += s.blocked;
                acc.skipped += s.skipped;
                acc.errors += s.errors;
                acc.no_match += s.no_match;
                acc
            })
    }
}

// ──────────────────── cursor ────────────────────

/// Persisted state of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanCursor {
    pub running: bool,
    pub address_index: usize,
    pub page_token: Option<String>,
    /// Files already handled on the page at `page_token`, set when a batch
    /// pauses mid-page and cleared once the position moves on.
    pub page_visited: Vec<String>,
    pub processed_count: u64,
    pub started_at: DateTime<Utc>,
    pub current_address: Option<String>,
    pub outcome_log: Vec<OutcomeRecord>,
    /// Target list captured when the run started.
    pub targets: Vec<TargetAddress>,
    pub tallies: Tallies,
    pub batch_count: u64,
    pub dropped_log_entries: u64,
    pub continuation_due_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScanCursor {
    /// A fresh running cursor positioned at the first address.
    #[must_use]
    pub fn new(targets: Vec<TargetAddress>, now: DateTime<Utc>) -> Self {
        let current_address = targets.first().map(|t| t.as_str().to_string());
        Self {
            running: true,
            address_index: 0,
            page_token: None,
            page_visited: Vec::new(),
            processed_count: 0,
            started_at: now,
            current_address,
            outcome_log: Vec::new(),
            targets,
            tallies: Tallies::default(),
            batch_count: 0,
            dropped_log_entries: 0,
            continuation_due_at: None,
            last_error: None,
            updated_at: now,
        }
    }

    /// Address the next batch will search, if any remain.
    #[must_use]
    pub fn current_target(&self) -> Option<&TargetAddress> {
        self.targets.get(self.address_index)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.address_index >= self.targets.len()
    }

    /// Stopped by a fatal batch error and not yet cleared or resumed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.running && self.last_error.is_some()
    }

    pub fn to_entries(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            map.insert(key.to_string(), value);
        };
        put(KEY_RUNNING, self.running.to_string());
        put(KEY_ADDRESS_INDEX, self.address_index.to_string());
        put(KEY_PAGE_TOKEN, self.page_token.clone().unwrap_or_default());
        put(KEY_PAGE_VISITED, serde_json::to_string(&self.page_visited)?);
        put(KEY_PROCESSED_COUNT, self.processed_count.to_string());
        put(KEY_START_TIMESTAMP, format_ts(self.started_at));
        put(
            KEY_CURRENT_ADDRESS,
            self.current_address.clone().unwrap_or_default(),
        );
        put(KEY_OUTCOME_LOG, serde_json::to_string(&self.outcome_log)?);
        put(KEY_TARGETS, serde_json::to_string(&self.targets)?);
        put(KEY_TALLIES, serde_json::to_string(&self.tallies)?);
        put(KEY_BATCH_COUNT, self.batch_count.to_string());
        put(KEY_DROPPED_LOG_ENTRIES, self.dropped_log_entries.to_string());
        put(
            KEY_CONTINUATION_DUE_AT,
            self.continuation_due_at.map(format_ts).unwrap_or_default(),
        );
        put(KEY_LAST_ERROR, self.last_error.clone().unwrap_or_default());
        put(KEY_UPDATED_AT, format_ts(self.updated_at));
        Ok(map)
    }

    /// Rebuild a cursor from stored entries. An empty map means no run exists.
    pub fn from_entries(map: &BTreeMap<String, String>) -> Result<Option<Self>> {
        if map.is_empty() {
            return Ok(None);
        }
        let started_at = parse_ts(KEY_START_TIMESTAMP, required(map, KEY_START_TIMESTAMP)?)?;
        Ok(Some(Self {
            running: parse_scalar(KEY_RUNNING, required(map, KEY_RUNNING)?)?,
            address_index: parse_scalar(KEY_ADDRESS_INDEX, required(map, KEY_ADDRESS_INDEX)?)?,
            page_token: optional(map, KEY_PAGE_TOKEN),
            page_visited: parse_json(map, KEY_PAGE_VISITED)?,
            processed_count: parse_scalar(
                KEY_PROCESSED_COUNT,
                required(map, KEY_PROCESSED_COUNT)?,
            )?,
            started_at,
            current_address: optional(map, KEY_CURRENT_ADDRESS),
            outcome_log: parse_json(map, KEY_OUTCOME_LOG)?,
            targets: parse_json(map, KEY_TARGETS)?,
            tallies: parse_json(map, KEY_TALLIES)?,
            batch_count: optional(map, KEY_BATCH_COUNT)
                .map(|raw| parse_scalar(KEY_BATCH_COUNT, &raw))
                .transpose()?
                .unwrap_or(0),
            dropped_log_entries: optional(map, KEY_DROPPED_LOG_ENTRIES)
                .map(|raw| parse_scalar(KEY_DROPPED_LOG_ENTRIES, &raw))
                .transpose()?
                .unwrap_or(0),
            continuation_due_at: optional(map, KEY_CONTINUATION_DUE_AT)
                .map(|raw| parse_ts(KEY_CONTINUATION_DUE_AT, &raw))
                .transpose()?,
            last_error: optional(map, KEY_LAST_ERROR),
            updated_at: optional(map, KEY_UPDATED_AT)
                .map(|raw| parse_ts(KEY_UPDATED_AT, &raw))
                .transpose()?
                .unwrap_or(started_at),
        }))
    }
}

/// Drop the oldest entries once the serialized log exceeds `max_chars`.
///
/// Removes 30% of the entries (at least one) in a single pass and returns the
/// number removed. The result may still exceed `max_chars`; the next update
/// trims again.
pub fn truncate_log(log: &mut Vec<OutcomeRecord>, max_chars: usize) -> Result<usize> {
    if log.is_empty() {
        return Ok(0);
    }
    let size = serde_json::to_string(log)?.chars().count();
    if size <= max_chars {
        return Ok(0);
    }
    let drop = (log.len() * 3 / 10).max(1);
    log.drain(..drop);
    Ok(drop)
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &'static str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| ShrError::CorruptState {
            key,
            details: "missing".to_string(),
        })
}

fn optional(map: &BTreeMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

fn parse_scalar<T>(key: &'static str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ShrError::CorruptState {
        key,
        details: format!("{raw:?}: {e}"),
    })
}

fn parse_ts(key: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ShrError::CorruptState {
            key,
            details: format!("{raw:?}: {e}"),
        })
}

fn parse_json<T>(map: &BTreeMap<String, String>, key: &'static str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match map.get(key).filter(|v| !v.is_empty()) {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| ShrError::CorruptState {
            key,
            details: e.to_string(),
        }),
    }
}
