#![forbid(unsafe_code)]

//! Share Revoker (shrev): bulk removal of file-sharing permissions held by a
//! list of departed principals.
//!
//! A run walks every file shared with each target address, one search page per
//! batch, and deletes the address's permission on each file. Position and
//! outcomes persist between batches, so a run survives per-batch time limits,
//! restarts and crashes:
//! 1. **Scanner** ([`scanner`]): search, per-file mutation, batch driver
//! 2. **State** ([`state`]): resumable cursor behind a repository trait, run lock
//! 3. **Daemon** ([`daemon`]): continuations, drive loop, notifications
//!
//! # Library usage
//!
//! ```rust,no_run
//! use share_revoker::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use share_revoker::core::config::Config;
//! use share_revoker::scanner::batch::{BatchScanner, BatchSettings};
//! ```

pub mod prelude;

pub mod backend;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod report;
pub mod scanner;
pub mod state;
