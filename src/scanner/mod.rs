//! Revocation pipeline: search query, per-file mutation, batch driver.

pub mod batch;
pub mod classify;
pub mod mutator;
pub mod outcome;
pub mod query;
