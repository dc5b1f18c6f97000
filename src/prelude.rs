//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use share_revoker::prelude::*;
//! ```

// Core
pub use crate::core::address::{TargetAddress, validate_targets};
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, ShrError};

// Backend
pub use crate::backend::drive::DriveBackend;
pub use crate::backend::memory::MemoryBackend;
pub use crate::backend::{BackendError, FileRef, PermissionEntry, Role, StorageBackend};

// Scanner
pub use crate::scanner::batch::{BatchScanner, BatchSettings, BatchStatus};
pub use crate::scanner::mutator::PermissionMutator;
pub use crate::scanner::outcome::{Outcome, OutcomeRecord};

// State
pub use crate::state::cursor::ScanCursor;
pub use crate::state::store::{InitOutcome, StateStore};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::runner::{DriveExit, RunLoop, RunnerSettings};
pub use crate::daemon::scheduler::ExecutionBudget;

// Report
pub use crate::report::summary::Summary;
