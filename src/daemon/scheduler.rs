//! Continuations and the per-batch execution budget.
//!
//! A run has at most one pending continuation: a due time stored on the
//! cursor. Scheduling replaces it, `cancel_continuation` and
//! `StateStore::clear` remove it.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::core::config::RunConfig;
use crate::core::errors::Result;
use crate::state::cursor::ScanCursor;
use crate::state::store::StateStore;

/// Where the pending continuation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    /// A batch should run now.
    Due,
    /// A batch is scheduled after the remaining delay.
    Waiting(Duration),
    /// The run is active but nothing is scheduled.
    None,
    /// The run stopped on a fatal error.
    Halted,
}

/// Register the single pending continuation `delay` from now.
///
/// Returns the due time, or `None` when there is no run to continue.
pub fn schedule_continuation(
    store: &mut StateStore,
    delay: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let Some(mut cursor) = store.load()? else {
        return Ok(None);
    };
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
    let due = Utc::now() + delay;
    // Stored at millisecond precision.
    let due = DateTime::from_timestamp_millis(due.timestamp_millis()).unwrap_or(due);
    cursor.continuation_due_at = Some(due);
    store.save(&cursor)?;
    Ok(Some(due))
}

/// Remove the pending continuation. Returns whether one was pending.
pub fn cancel_continuation(store: &mut StateStore) -> Result<bool> {
    let Some(mut cursor) = store.load()? else {
        return Ok(false);
    };
    if cursor.continuation_due_at.is_none() {
        return Ok(false);
    }
    cursor.continuation_due_at = None;
    store.save(&cursor)?;
    Ok(true)
}

#[must_use]
pub fn continuation_state(cursor: &ScanCursor, now: DateTime<Utc>) -> ContinuationState {
    if !cursor.running {
        return ContinuationState::Halted;
    }
    match cursor.continuation_due_at {
        None => ContinuationState::None,
        Some(due) if due <= now => ContinuationState::Due,
        Some(due) => ContinuationState::Waiting((due - now).to_std().unwrap_or(Duration::ZERO)),
    }
}

/// Wall-clock ceiling for one batch.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudget {
    started: Instant,
    ceiling: Duration,
}

impl ExecutionBudget {
    #[must_use]
    pub fn new(ceiling: Duration) -> Self {
        Self {
            started: Instant::now(),
            ceiling,
        }
    }

    #[must_use]
    pub fn from_config(run: &RunConfig) -> Self {
        Self::new(Duration::from_secs(run.max_execution_secs))
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.ceiling
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.ceiling.saturating_sub(self.started.elapsed())
    }
}
