//! Run orchestration: continuations, the drive loop, signal handling and
//! operator notifications.

pub mod notifications;
#[cfg(feature = "daemon")]
pub mod runner;
pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;
