//! Resumable run state: cursor model, store, repositories, run lock.

pub mod cursor;
pub mod file_repo;
pub mod lock;
#[cfg(feature = "sqlite")]
pub mod sqlite_repo;
pub mod store;
