//! Activity logging: SQLite (WAL) plus append-only JSONL, fed by one channel.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod stats;
