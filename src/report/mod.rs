//! End-of-run summary and its plain-text rendering.

pub mod render;
pub mod summary;
