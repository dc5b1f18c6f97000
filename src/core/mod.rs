//! Core types: errors, configuration, target addresses.

pub mod address;
pub mod config;
pub mod errors;
