//! Drive loop: waits for the pending continuation and runs due batches.
//!
//! `drive` keeps going until the run completes, halts, disappears (stopped
//! from another process) or a shutdown signal arrives. `tick` runs at most
//! one due batch and returns, for hosts that schedule the tool externally.
//! Every batch runs under the run lock with a fresh execution budget, and the
//! continuation is re-checked once the lock is held.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use crate::core::config::Config;
use crate::core::errors::{Result, ShrError};
use crate::core::address::TargetAddress;
use crate::daemon::scheduler::{ContinuationState, ExecutionBudget, continuation_state};
use crate::daemon::signals::SignalHandler;
use crate::report::summary::Summary;
use crate::scanner::batch::{BatchScanner, BatchStatus, ResumeOutcome};
use crate::state::lock::RunLock;
use crate::state::store::InitOutcome;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub lock_path: PathBuf,
    pub max_execution: Duration,
    /// Longest single wait before the cursor is reloaded.
    pub poll_interval: Duration,
    /// Granularity of signal checks while waiting.
    pub wait_slice: Duration,
}

impl RunnerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_path: config.paths.lock_file.clone(),
            max_execution: Duration::from_secs(config.run.max_execution_secs),
            poll_interval: Duration::from_secs(1),
            wait_slice: Duration::from_millis(100),
        }
    }
}

/// Why `drive` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveExit {
    Completed(Box<Summary>),
    Failed { code: String, message: String },
    /// The run was halted before this loop started.
    Halted { last_error: Option<String> },
    /// The cursor is running but no continuation is registered.
    Unscheduled,
    /// No run is stored (never started, or stopped while waiting).
    NoRun,
    Interrupted,
}

/// Result of a single `tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(BatchStatus),
    NotDue(Duration),
    Unscheduled,
    Halted,
    NoRun,
    /// Another process holds the run lock.
    Busy,
}

/// What happened once the run lock was held.
#[derive(Debug)]
enum Locked {
    Ran(BatchStatus),
    /// Another process changed the run between the check and the lock.
    Changed,
}

pub struct RunLoop {
    scanner: BatchScanner,
    signals: SignalHandler,
    settings: RunnerSettings,
    batches_run: u64,
}

impl RunLoop {
    #[must_use]
    pub fn new(scanner: BatchScanner, signals: SignalHandler, settings: RunnerSettings) -> Self {
        Self {
            scanner,
            signals,
            settings,
            batches_run: 0,
        }
    }

    #[must_use]
    pub const fn batches_run(&self) -> u64 {
        self.batches_run
    }

    pub fn scanner_mut(&mut self) -> &mut BatchScanner {
        &mut self.scanner
    }

    /// Begin a run while holding the run lock.
    pub fn start(&mut self, targets: Vec<TargetAddress>, config_hash: &str) -> Result<InitOutcome> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        self.scanner.start_run(targets, config_hash)
    }

    /// Make the stored run due now while holding the run lock.
    pub fn resume(&mut self, retry: bool) -> Result<ResumeOutcome> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        self.scanner.resume(retry)
    }

    pub fn drive(&mut self) -> Result<DriveExit> {
        loop {
            if self.signals.should_shutdown() {
                eprintln!("[SHR-RUNNER] shutdown requested; cursor saved");
                return Ok(DriveExit::Interrupted);
            }
            let Some(cursor) = self.scanner.store().load()? else {
                return Ok(DriveExit::NoRun);
            };

            match continuation_state(&cursor, Utc::now()) {
                ContinuationState::Halted => {
                    return Ok(DriveExit::Halted {
                        last_error: cursor.last_error,
                    });
                }
                ContinuationState::None => return Ok(DriveExit::Unscheduled),
                ContinuationState::Waiting(remaining) => {
                    let wait = remaining.min(self.settings.poll_interval);
                    self.signals.wait(wait, self.settings.wait_slice);
                }
                ContinuationState::Due => match self.run_locked() {
                    Ok(Locked::Ran(BatchStatus::Completed(summary))) => {
                        return Ok(DriveExit::Completed(summary));
                    }
                    Ok(Locked::Ran(BatchStatus::Failed { code, message })) => {
                        return Ok(DriveExit::Failed { code, message });
                    }
                    Ok(_) => {}
                    Err(ShrError::LockHeld { path }) => {
                        eprintln!(
                            "[SHR-RUNNER] {} is held by another process; waiting",
                            path.display()
                        );
                        self.signals
                            .wait(self.settings.poll_interval, self.settings.wait_slice);
                    }
                    Err(err) => return Err(err),
                },
            }
        }
    }

    /// Run the pending batch if it is due; never waits.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let Some(cursor) = self.scanner.store().load()? else {
            return Ok(TickOutcome::NoRun);
        };
        if let Some(outcome) = idle_tick(&continuation_state(&cursor, Utc::now())) {
            return Ok(outcome);
        }
        match self.run_locked() {
            Ok(Locked::Ran(status)) => Ok(TickOutcome::Ran(status)),
            Ok(Locked::Changed) => match self.scanner.store().load()? {
                Some(cursor) => Ok(idle_tick(&continuation_state(&cursor, Utc::now()))
                    .unwrap_or(TickOutcome::NotDue(Duration::ZERO))),
                None => Ok(TickOutcome::NoRun),
            },
            Err(ShrError::LockHeld { .. }) => Ok(TickOutcome::Busy),
            Err(err) => Err(err),
        }
    }

    /// Take the lock, confirm the batch is still due, and run it.
    fn run_locked(&mut self) -> Result<Locked> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        let due = self
            .scanner
            .store()
            .load()?
            .is_some_and(|cursor| continuation_state(&cursor, Utc::now()) == ContinuationState::Due);
        if !due {
            return Ok(Locked::Changed);
        }
        let budget = ExecutionBudget::new(self.settings.max_execution);
        let signals = self.signals.clone();
        let status = self
            .scanner
            .run_batch(&|| budget.exhausted() || signals.should_shutdown())?;
        self.batches_run += 1;
        Ok(Locked::Ran(status))
    }
}

/// Tick outcome for a run that has nothing due.
fn idle_tick(state: &ContinuationState) -> Option<TickOutcome> {
    match state {
        ContinuationState::Due => None,
        ContinuationState::Halted => Some(TickOutcome::Halted),
        ContinuationState::None => Some(TickOutcome::Unscheduled),
        ContinuationState::Waiting(remaining) => Some(TickOutcome::NotDue(*remaining)),
    }
}
